use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::info;

use crate::api::{APIResponse, ErrorResponse};
use crate::error::SyncError;
use crate::model::CollectionKind;
use crate::store::RecordStore;
use crate::sync::SyncService;
use crate::{bad_request, not_found, server_error, unpack_error};

pub struct AppState<S> {
    pub sync: SyncService<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(APIResponse::new_from_msg("ok"))
}

pub async fn fetch_collection<S: RecordStore>(
    State(state): State<AppState<S>>,
    Path((kind, user_id)): Path<(String, String)>,
) -> Response {
    let Some(kind) = CollectionKind::from_str(&kind) else {
        return not_found(&format!("unknown collection `{kind}`"));
    };

    match state.sync.fetch(&user_id, kind).await {
        Ok(collection) => {
            tracing::info!(user_id = %user_id, kind = %kind, count = collection.len(), "fetched collection");
            (StatusCode::OK, Json(collection)).into_response()
        }
        Err(e) => error_response(&user_id, kind, e),
    }
}

pub async fn replace_collection<S: RecordStore>(
    State(state): State<AppState<S>>,
    Path((kind, user_id)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(kind) = CollectionKind::from_str(&kind) else {
        return not_found(&format!("unknown collection `{kind}`"));
    };

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::warn!(user_id = %user_id, kind = %kind, error = %rejection.body_text(), "rejected request body");
            let status = match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            return (status, Json(ErrorResponse::new(&rejection.body_text()))).into_response();
        }
    };

    match state.sync.replace(&user_id, kind, &body).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(e) => error_response(&user_id, kind, e),
    }
}

/// Collection paths without a user segment.
pub async fn missing_user_id(Path(kind): Path<String>) -> Response {
    let Some(kind) = CollectionKind::from_str(&kind) else {
        return not_found(&format!("unknown collection `{kind}`"));
    };
    tracing::warn!(kind = %kind, "request without user id");
    bad_request("user id must not be empty")
}

fn error_response(user_id: &str, kind: CollectionKind, err: SyncError) -> Response {
    match &err {
        SyncError::InvalidArgument(msg) => {
            tracing::warn!(user_id = %user_id, kind = %kind, "invalid request: {}", msg);
            bad_request(msg)
        }
        SyncError::StorageUnavailable(_) => {
            tracing::error!(user_id = %user_id, kind = %kind, error = %unpack_error(&err), "storage failure");
            server_error("storage unavailable, retry the request")
        }
        SyncError::PartialWriteDetected { .. } => {
            tracing::error!(user_id = %user_id, kind = %kind, error = %err, "replace rolled back");
            server_error("write could not be completed, retry the request")
        }
    }
}
