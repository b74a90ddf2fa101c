//! HTTP API
//!
//! Axum router over a [`PetPetCache`](crate::cache::PetPetCache) and the
//! server that runs it.

pub mod rest;
pub mod server;

pub use rest::{
    parse_petpet_query, ApiErrorResponse, ImageListResponse, ImageListState, RestRouter,
};
pub use server::{ApiServer, ApiServerConfig};
