//! Adapters - Concrete implementations of the domain ports
//!
//! - [`HttpAvatarFetcher`]: fetches avatars from the upstream HTTP provider
//! - [`CommandGenerator`]: renders GIFs by piping avatars through an
//!   external renderer process

mod avatar;
mod generator;

pub use avatar::HttpAvatarFetcher;
pub use generator::{render_args, CommandGenerator};
