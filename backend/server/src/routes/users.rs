use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    routing::{get, post, put},
};
use serde::Deserialize;

use super::extract::{Json, Path, Query};

use crate::{
    auth::{Principal, TelegramLogin},
    error::AppError,
    models::{HelpRequest, Page, Role, User, UserId},
    search::RequestFilter,
    services::users::{Session, UpdateProfile},
    state::AppState,
    utils::Pagination,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    refresh_token: String,
}

#[derive(Deserialize)]
pub struct RoleBody {
    role: Role,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/telegram", post(telegram_login_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/users/me", get(me_handler).put(update_me_handler))
        .route("/users/me/requests", get(my_requests_handler))
        .route("/users/me/volunteer-requests", get(my_volunteer_requests_handler))
        .route("/users/me/volunteer", post(volunteer_handler))
        .route("/users/{id}", get(user_handler))
        .route("/users/{id}/role", put(role_handler))
}

pub async fn telegram_login_handler(
    State(state): State<Arc<AppState>>,
    Json(login): Json<TelegramLogin>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.users.telegram_login(login).await?))
}

pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.users.refresh(&body.refresh_token).await?))
}

pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get(principal.user_id).await?))
}

pub async fn update_me_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<UpdateProfile>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.update_profile(&principal, body).await?))
}

pub async fn user_handler(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get(user_id).await?))
}

pub async fn volunteer_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.users.become_volunteer(&principal).await?))
}

pub async fn role_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(user_id): Path<UserId>,
    Json(body): Json<RoleBody>,
) -> Result<Json<User>, AppError> {
    Ok(Json(
        state.users.set_role(&principal, user_id, body.role).await?,
    ))
}

pub async fn my_requests_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<HelpRequest>>, AppError> {
    let window = pagination.resolve()?;
    let filter = RequestFilter {
        requester_id: Some(principal.user_id),
        ..Default::default()
    };

    Ok(Json(state.requests.list(filter, window).await?))
}

pub async fn my_volunteer_requests_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<HelpRequest>>, AppError> {
    let window = pagination.resolve()?;
    let filter = RequestFilter {
        assigned_to: Some(principal.user_id),
        ..Default::default()
    };

    Ok(Json(state.requests.list(filter, window).await?))
}
