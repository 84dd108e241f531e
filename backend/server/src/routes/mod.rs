use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::state::AppState;

pub mod extract;
pub mod game;
pub mod requests;
pub mod users;

/// Everything under `/api`, plus the unauthenticated health check.
pub fn router() -> Router<Arc<AppState>> {
    let api = Router::new()
        .merge(users::router())
        .merge(requests::router())
        .merge(game::router());

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
