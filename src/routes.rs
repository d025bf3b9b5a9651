use axum::{Router, routing::get};

use crate::handler::{self, AppState};
use crate::store::RecordStore;

pub fn routes<S: RecordStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/", get(handler::healthcheck))
        .route(
            "/collections/:kind/:user_id",
            get(handler::fetch_collection::<S>).put(handler::replace_collection::<S>),
        )
        .route(
            "/collections/:kind",
            get(handler::missing_user_id).put(handler::missing_user_id),
        )
        .route(
            "/collections/:kind/",
            get(handler::missing_user_id).put(handler::missing_user_id),
        )
        // paths the existing web client already calls
        .route(
            "/api/:kind/:user_id",
            get(handler::fetch_collection::<S>).post(handler::replace_collection::<S>),
        )
        .route(
            "/api/:kind",
            get(handler::missing_user_id).post(handler::missing_user_id),
        )
        .route(
            "/api/:kind/",
            get(handler::missing_user_id).post(handler::missing_user_id),
        )
}
