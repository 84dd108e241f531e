//! Documentation of a community help-request board.
//!
//! People post requests for help (groceries, a ride, a repair), volunteers take
//! them, and both sides earn experience, levels and achievements along the way.
//!
//!
//!
//! # General Infrastructure
//! - Single axum server, JSON over HTTP under `/api`
//! - SQLite file for everything persistent, see [`database`]
//! - Users sign in with the Telegram login widget, we hand out our own JWTs, see [`auth`]
//! - Rewards and notifications are queued and applied by one background worker, see [`outbox`]
//!
//!
//!
//! # Request Flow
//!
//! **Goal**: a request gets at most one volunteer and every reward is paid once.
//!
//! - Handler extracts the [`auth::Principal`] from the bearer token
//! - Service loads the request and asks [`lifecycle`] whether the move is allowed
//! - Database applies the move with a conditional update, a lost race is a `409`
//! - Only after the write succeeds are rewards queued
//! - Worker applies rewards, follow-ups (level-ups, unlocks) go back on the queue
//!
//!
//!
//! # Notes
//!
//! ## Leveling
//! Quadratic: level `L` needs `100 * L²` total experience, level 1 is free.
//! See [`leveling`] for the table.
//!
//! ## Roles
//! - `user`: posts requests, comments, rates
//! - `volunteer`: also takes and completes requests. Any user can sign up via `/api/users/me/volunteer`
//! - `admin`: everything, plus role changes and acting on behalf of others.
//!   Telegram ids listed in `ADMIN_TELEGRAM_IDS` become admins on login
//!
//!
//!
//! # Setup
//!
//! Run locally.
//! ```sh
//! JWT_SECRET=$(openssl rand -hex 32) TELEGRAM_BOT_TOKEN=... RUST_LOG=info cargo run -p helpboard
//! ```
//!
//! Log every experience change.
//! ```sh
//! cargo run -p helpboard --features server/verbose
//! ```
//!
//! Build a signed login payload for manual testing.
//! ```sh
//! cargo run -p tester -- --id 42 --first-name Anna --out login.json
//! curl -X POST localhost:8080/api/auth/telegram -H 'Content-Type: application/json' -d @login.json
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{
        HeaderValue, Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod achievements;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod leveling;
pub mod lifecycle;
pub mod models;
pub mod outbox;
pub mod rewards;
pub mod routes;
pub mod search;
pub mod services;
pub mod state;
pub mod utils;

use config::Config;
use database::Database;
use outbox::{ChannelOutbox, spawn_worker};
use state::AppState;

/// Router with middleware, ready to serve.
pub fn app(state: Arc<AppState>) -> Router {
    let origin = match state.config.allowed_origin.as_str() {
        "*" => AllowOrigin::any(),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => AllowOrigin::any(),
        },
    };

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(300));

    routes::router()
        .layer(timeout_layer(state.config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Requests running past `deadline` get a `408`.
fn timeout_layer(deadline: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, deadline)
}

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let database = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    let (outbox, receiver) = ChannelOutbox::new();
    let state = AppState::new(config, database, Arc::new(outbox));
    spawn_worker(receiver, state.game.clone());

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn slow_requests_time_out_with_408() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .layer(timeout_layer(Duration::from_millis(20)));

        let response = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
