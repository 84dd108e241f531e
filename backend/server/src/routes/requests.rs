use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::extract::{Json, Path, Query};

use crate::{
    auth::Principal,
    error::AppError,
    models::{
        Category, Comment, HelpRequest, Page, Priority, RequestId, RequestStats, RequestStatus,
    },
    search::RequestFilter,
    services::requests::{CreateRequest, UpdateRequest},
    state::AppState,
    utils::Pagination,
};

/// `GET /api/requests?status=new&priority=high&categoryId=2&q=stairs&page=1&pageSize=20`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    status: Option<RequestStatus>,
    priority: Option<Priority>,
    category_id: Option<i64>,
    q: Option<String>,
}

#[derive(Deserialize)]
pub struct RateBody {
    rating: i64,
    #[serde(default)]
    comment: String,
}

#[derive(Deserialize)]
pub struct CommentBody {
    text: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/requests", get(list_handler).post(create_handler))
        .route("/requests/categories", get(categories_handler))
        .route(
            "/requests/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/requests/{id}/take", post(take_handler))
        .route("/requests/{id}/complete", post(complete_handler))
        .route("/requests/{id}/cancel", post(cancel_handler))
        .route("/requests/{id}/rate", post(rate_handler))
        .route(
            "/requests/{id}/comments",
            get(comments_handler).post(add_comment_handler),
        )
        .route("/stats", get(stats_handler))
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<HelpRequest>>, AppError> {
    let window = Pagination {
        page: query.page,
        page_size: query.page_size,
    }
    .resolve()?;

    let filter = RequestFilter {
        status: query.status,
        priority: query.priority,
        category_id: query.category_id,
        text: query.q,
        ..Default::default()
    };

    Ok(Json(state.requests.list(filter, window).await?))
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(body): Json<CreateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.requests.create(&principal, body).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<HelpRequest>, AppError> {
    Ok(Json(state.requests.get(request_id).await?))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
    Json(body): Json<UpdateRequest>,
) -> Result<Json<HelpRequest>, AppError> {
    Ok(Json(
        state.requests.update(&principal, request_id, body).await?,
    ))
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
) -> Result<Json<Value>, AppError> {
    state.requests.delete(&principal, request_id).await?;
    Ok(Json(json!({ "deleted": request_id })))
}

pub async fn take_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
) -> Result<Json<HelpRequest>, AppError> {
    Ok(Json(state.requests.take(&principal, request_id).await?))
}

pub async fn complete_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
) -> Result<Json<HelpRequest>, AppError> {
    Ok(Json(state.requests.complete(&principal, request_id).await?))
}

pub async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
) -> Result<Json<HelpRequest>, AppError> {
    Ok(Json(state.requests.cancel(&principal, request_id).await?))
}

pub async fn rate_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
    Json(body): Json<RateBody>,
) -> Result<impl IntoResponse, AppError> {
    let rating = state
        .requests
        .rate(&principal, request_id, body.rating, body.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

pub async fn comments_handler(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<Vec<Comment>>, AppError> {
    Ok(Json(state.requests.comments(request_id).await?))
}

pub async fn add_comment_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(request_id): Path<RequestId>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, AppError> {
    let comment = state
        .requests
        .add_comment(&principal, request_id, &body.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn categories_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.requests.categories().await?))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RequestStats>, AppError> {
    Ok(Json(state.requests.stats().await?))
}
