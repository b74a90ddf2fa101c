//! REST API Handlers
//!
//! Serves generated GIFs on `/:id`, raw avatars on `/avatar/:id`, the
//! statistics document on `/stats` and a browsable view of the stored
//! entries under `/api/images` and `/cache/:type/:file`.

use crate::cache::key::{is_source_id, CacheKey, Objects, PetPetParams, ResultKey, SourceKey};
use crate::cache::metrics::Route;
use crate::cache::store::{EntryStore, StoreKind};
use crate::cache::PetPetCache;
use crate::error::{Error, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Clients may keep a 204 for 30 days
pub const NO_CONTENT_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

// =============================================================================
// Response Types
// =============================================================================

/// Body of every JSON error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub ok: bool,
    pub code: u16,
    pub status_text: String,
    pub message: String,
}

impl ApiErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiErrorResponse::new(status, message))).into_response()
}

async fn no_content_handler() -> Response {
    no_content()
}

fn no_content() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(
            header::CACHE_CONTROL,
            format!("public, max-age={}", NO_CONTENT_MAX_AGE_SECS),
        )],
    )
        .into_response()
}

fn image_response(content_type: &'static str, bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

/// Map a failed request onto an HTTP response
///
/// Provider refusals keep the provider's status; everything else is a 500.
fn failure_response(err: &Error) -> Response {
    if let Some(status) = err
        .upstream_status()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .filter(|status| status.is_client_error() || status.is_server_error())
    {
        return error_response(status, err.to_string());
    }

    error!(error = %err, kind = ?err.kind(), "Request failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something went wrong while processing the request",
    )
}

// =============================================================================
// Query Parsing
// =============================================================================

/// Parse the `/:id` query string into generation parameters
///
/// Absent or empty parameters keep their defaults.
pub fn parse_petpet_query(query: &HashMap<String, String>) -> Result<PetPetParams> {
    let mut params = PetPetParams::default();
    let value = |name: &str| query.get(name).map(String::as_str).filter(|v| !v.is_empty());

    if let Some(raw) = value("shift") {
        (params.shift_x, params.shift_y) = parse_pair("shift", raw)?;
    }
    if let Some(raw) = value("resize") {
        (params.resize_x, params.resize_y) = parse_pair("resize", raw)?;
    }
    if let Some(raw) = value("size") {
        params.size = parse_positive("size", raw)?;
    }
    if let Some(raw) = value("gifsize") {
        params.gif_size = parse_positive("gifsize", raw)?;
    }
    if let Some(raw) = value("fps") {
        if raw.len() > 2 {
            return Err(invalid("fps", "use an integer in range [1, 99]"));
        }
        params.fps = parse_positive("fps", raw)?;
    }
    if let Some(raw) = value("squeeze") {
        params.squeeze = parse_integer("squeeze", raw)?;
    }
    if let Some(raw) = value("objects") {
        params.objects = raw
            .parse::<Objects>()
            .map_err(|e| invalid("objects", format!("{}; use hand, avatar or both", e)))?;
    }

    Ok(params)
}

fn invalid(param: &'static str, message: impl Into<String>) -> Error {
    Error::InvalidParameter {
        param,
        message: message.into(),
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_integer(param: &'static str, raw: &str) -> Result<i32> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !is_digits(digits) {
        return Err(invalid(param, format!("'{}' is not an integer", raw)));
    }
    raw.parse()
        .map_err(|_| invalid(param, format!("'{}' is out of range", raw)))
}

fn parse_positive(param: &'static str, raw: &str) -> Result<u32> {
    if !is_digits(raw) {
        return Err(invalid(param, format!("'{}' is not a positive integer", raw)));
    }
    match raw.parse::<u32>() {
        Ok(0) => Err(invalid(param, "must be at least 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(param, format!("'{}' is out of range", raw))),
    }
}

/// `{Integer}x{Integer}`, e.g. `-5x20`
fn parse_pair(param: &'static str, raw: &str) -> Result<(i32, i32)> {
    let (a, b) = raw
        .split_once('x')
        .ok_or_else(|| invalid(param, format!("'{}' is not of the form AxB", raw)))?;
    Ok((parse_integer(param, a)?, parse_integer(param, b)?))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    cache: PetPetCache,
}

impl RestRouter {
    pub fn new(cache: PetPetCache) -> Self {
        Self { cache }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState { cache: self.cache };

        Router::new()
            .route("/favicon.ico", get(no_content_handler))
            .route("/stats", get(get_stats))
            .route("/api/images", get(list_images))
            .route("/cache/:type/:file", get(get_cached_file))
            .route("/avatar/:id", get(get_avatar))
            .route("/:id", get(get_petpet))
            .fallback(no_content_handler)
            .with_state(state)
            .layer(CorsLayer::new().allow_origin(Any))
            .layer(TraceLayer::new_for_http())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    cache: PetPetCache,
}

// =============================================================================
// Handlers
// =============================================================================

/// Generated petpet GIF
async fn get_petpet(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !is_source_id(&id) {
        return no_content();
    }
    let metrics = state.cache.metrics();

    let params = match parse_petpet_query(&query) {
        Ok(params) => params,
        Err(e) => {
            metrics.record_response(Route::PetPet, false);
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    let force_refresh = query.contains_key("upd");
    debug!(id = %id, ?params, force_refresh, "Petpet requested");

    match state.cache.request_result(&id, &params, force_refresh).await {
        Ok(gif) => {
            metrics.record_response(Route::PetPet, true);
            image_response("image/gif", gif)
        }
        Err(e) => {
            metrics.record_response(Route::PetPet, false);
            failure_response(&e)
        }
    }
}

/// Raw avatar, optionally at a specific size
async fn get_avatar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !is_source_id(&id) {
        return no_content();
    }
    let metrics = state.cache.metrics();

    let size = match query.get("size").filter(|raw| !raw.is_empty()) {
        None => None,
        Some(raw) if is_digits(raw) => match raw.parse::<u32>() {
            Ok(size) => Some(size),
            Err(_) => {
                metrics.record_response(Route::Avatar, false);
                return error_response(StatusCode::BAD_REQUEST, "Size parameter out of range");
            }
        },
        Some(_) => {
            metrics.record_response(Route::Avatar, false);
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid size parameter. Size must contain only digits from 0 to 9 and be positive",
            );
        }
    };

    match state.cache.request_source(&id, size).await {
        Ok(png) => {
            metrics.record_response(Route::Avatar, true);
            image_response("image/png", png)
        }
        Err(e) => {
            metrics.record_response(Route::Avatar, false);
            failure_response(&e)
        }
    }
}

/// Cache statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats().await)
}

// =============================================================================
// Cache Browsing
// =============================================================================

/// Listing state of `/api/images`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageListState {
    /// Nothing stored
    NoContent,
    /// Nothing stored and caching is switched off
    CacheDisabled,
    Completed,
}

/// Body of `/api/images`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub state: ImageListState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<String>,
}

/// URL segment under `/cache/` for each store
fn browse_segment(kind: StoreKind) -> &'static str {
    match kind {
        StoreKind::Result => "gifs",
        StoreKind::Source => "avatars",
    }
}

async fn browse_paths<K: CacheKey>(store: &EntryStore<K>) -> Vec<String> {
    let kind = store.kind();
    let mut paths: Vec<String> = store
        .list_keys()
        .await
        .iter()
        .map(|key| {
            format!(
                "/cache/{}/{}.{}",
                browse_segment(kind),
                key.storage_key(),
                kind.extension()
            )
        })
        .collect();
    paths.sort();
    paths
}

/// Paths of stored entries; `type` is `petpets`, `avatars` or `all` (default)
async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<ImageListResponse> {
    let (gifs, avatars) = match query.get("type").map(String::as_str) {
        Some("petpets") => (true, false),
        Some("avatars") => (false, true),
        _ => (true, true),
    };

    let mut value = Vec::new();
    if gifs {
        value.extend(browse_paths(state.cache.results()).await);
    }
    if avatars {
        value.extend(browse_paths(state.cache.sources()).await);
    }

    let listing = if !value.is_empty() {
        ImageListState::Completed
    } else if state.cache.policy().enabled() {
        ImageListState::NoContent
    } else {
        ImageListState::CacheDisabled
    };
    Json(ImageListResponse {
        state: listing,
        value,
    })
}

/// Serve a stored entry by the path `/api/images` listed it under
async fn get_cached_file(
    State(state): State<AppState>,
    Path((segment, file)): Path<(String, String)>,
) -> Response {
    let cached = match segment.as_str() {
        "gifs" => match stored_key::<ResultKey>(&file, StoreKind::Result) {
            Some(key) => state.cache.results().get(&key).await.map(|b| ("image/gif", b)),
            None => None,
        },
        "avatars" => match stored_key::<SourceKey>(&file, StoreKind::Source) {
            Some(key) => state.cache.sources().get(&key).await.map(|b| ("image/png", b)),
            None => None,
        },
        _ => None,
    };

    match cached {
        Some((content_type, bytes)) => image_response(content_type, bytes),
        None => error_response(StatusCode::NOT_FOUND, format!("No cached file '{}'", file)),
    }
}

/// Parse `<storage key>.<ext>` for a store of `kind`
fn stored_key<K: CacheKey>(file: &str, kind: StoreKind) -> Option<K> {
    let stem = file.strip_suffix(kind.extension())?.strip_suffix('.')?;
    K::from_storage_key(stem)
}
