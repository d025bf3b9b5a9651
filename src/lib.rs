use crate::api::ErrorResponse;
use crate::config::App;
use crate::handler::AppState;
use crate::store::RecordStore;
use crate::sync::SyncService;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::error::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod model;
pub mod routes;
pub mod store;
pub mod sync;

pub fn server_error(msg: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(msg))).into_response()
}

pub fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
}

pub fn not_found(msg: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg))).into_response()
}

pub fn unpack_error(err: &dyn Error) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

pub fn router<S: RecordStore>(sync: SyncService<S>, max_body_bytes: usize) -> Router {
    routes::routes::<S>()
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(AppState { sync })
}

pub fn cors_layer(cfg: &App) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    if cfg.allows_any_origin() {
        return Ok(cors.allow_origin(Any));
    }

    let origins = cfg
        .allowed_origins
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}
