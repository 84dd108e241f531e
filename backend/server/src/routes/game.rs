use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::extract::{Json, Query};

use crate::{
    auth::Principal,
    error::AppError,
    leveling::Progression,
    models::{AchievementStatus, LeaderboardEntry, Notification, Page, UserAchievement, UserId},
    services::game::GameProfile,
    state::AppState,
    utils::Pagination,
};

/// `userId` defaults to the caller; anyone else needs admin.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceBody {
    user_id: Option<UserId>,
    amount: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockBody {
    user_id: Option<UserId>,
    achievement_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    user_id: Option<UserId>,
    achievement_id: String,
    delta: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    #[serde(default)]
    unread: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBody {
    notification_id: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/game/profile", get(profile_handler))
        .route("/game/achievements", get(achievements_handler))
        .route("/game/achievements/unlock", post(unlock_handler))
        .route("/game/achievements/progress", post(progress_handler))
        .route("/game/experience", post(experience_handler))
        .route("/game/leaderboard", get(leaderboard_handler))
        .route("/game/notifications", get(notifications_handler))
        .route("/game/notifications/read", post(read_handler))
        .route("/game/notifications/readall", post(read_all_handler))
}

pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<GameProfile>, AppError> {
    Ok(Json(state.game.profile(principal.user_id).await?))
}

pub async fn achievements_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<AchievementStatus>>, AppError> {
    Ok(Json(state.game.achievements(principal.user_id).await?))
}

pub async fn experience_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<ExperienceBody>,
) -> Result<Json<Progression>, AppError> {
    let user_id = body.user_id.unwrap_or(principal.user_id);
    Ok(Json(
        state
            .game
            .grant_experience(&principal, user_id, body.amount)
            .await?,
    ))
}

pub async fn unlock_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<UnlockBody>,
) -> Result<Json<UserAchievement>, AppError> {
    let user_id = body.user_id.unwrap_or(principal.user_id);
    Ok(Json(
        state
            .game
            .unlock(&principal, user_id, body.achievement_id)
            .await?,
    ))
}

pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<ProgressBody>,
) -> Result<Json<UserAchievement>, AppError> {
    let user_id = body.user_id.unwrap_or(principal.user_id);
    Ok(Json(
        state
            .game
            .update_progress(&principal, user_id, body.achievement_id, body.delta)
            .await?,
    ))
}

pub async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<LeaderboardEntry>>, AppError> {
    Ok(Json(state.game.leaderboard(pagination.resolve()?).await?))
}

pub async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Page<Notification>>, AppError> {
    let window = Pagination {
        page: query.page,
        page_size: query.page_size,
    }
    .resolve()?;

    Ok(Json(
        state
            .game
            .notifications(principal.user_id, query.unread, window)
            .await?,
    ))
}

pub async fn read_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<ReadBody>,
) -> Result<Json<Value>, AppError> {
    state
        .game
        .mark_read(principal.user_id, body.notification_id.clone())
        .await?;
    Ok(Json(json!({ "read": body.notification_id })))
}

pub async fn read_all_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Value>, AppError> {
    let updated = state.game.mark_all_read(principal.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}
