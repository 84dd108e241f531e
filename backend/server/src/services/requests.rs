//! # Help Requests
//!
//! Everything a requester or volunteer does with a request. Each operation
//! checks the lifecycle rules, writes through the database and then queues its
//! rewards:
//!
//! | Operation | Experience                                        | Metric             |
//! |-----------|---------------------------------------------------|--------------------|
//! | create    | requester +10                                     | requests_created   |
//! | take      | volunteer +15                                     |                    |
//! | complete  | volunteer +20/30/50 by priority, requester +20    | requests_completed |
//! | rate      | volunteer +25 for 5 stars, +15 for 4              | five_star_ratings  |
//! | comment   | author +5                                         | comments_written   |
//!
//! Rewards are queued only after the write succeeds, so a request that lost a
//! race never pays out.
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::{
    achievements::Advance,
    auth::Principal,
    database::{
        Database,
        requests::{NewRating, NewRequest, RequestEdit},
    },
    error::AppError,
    lifecycle::{self, Action},
    models::{
        Category, Comment, HelpRequest, Metric, NotificationKind, Page, Priority, Rating,
        RequestId, RequestStats, UserId,
    },
    outbox::{Notice, Task, TaskSink},
    rewards,
    search::RequestFilter,
    utils::{PageWindow, check_length, check_optional},
};

const TITLE_LEN: (usize, usize) = (5, 255);
const DESCRIPTION_LEN: (usize, usize) = (10, 5000);
const LOCATION_LEN: (usize, usize) = (1, 255);
const COMMENT_LEN: (usize, usize) = (1, 1000);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub title: String,
    pub description: String,
    pub category_id: i64,
    #[serde(default)]
    pub priority: Priority,
    pub location: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub location: Option<String>,
}

#[derive(Clone)]
pub struct RequestService {
    db: Database,
    outbox: Arc<dyn TaskSink>,
}

impl RequestService {
    pub fn new(db: Database, outbox: Arc<dyn TaskSink>) -> Self {
        Self { db, outbox }
    }

    fn notify(&self, user_id: UserId, kind: NotificationKind, request: &HelpRequest, title: &str) {
        self.outbox.submit(Task::Notify(Notice {
            user_id,
            kind,
            title: title.to_string(),
            message: request.title.clone(),
            request_id: Some(request.id),
            achievement_id: None,
        }));
    }

    pub async fn create(
        &self,
        actor: &Principal,
        input: CreateRequest,
    ) -> Result<HelpRequest, AppError> {
        let new = NewRequest {
            title: check_length("title", &input.title, TITLE_LEN.0, TITLE_LEN.1)?,
            description: check_length(
                "description",
                &input.description,
                DESCRIPTION_LEN.0,
                DESCRIPTION_LEN.1,
            )?,
            category_id: input.category_id,
            priority: input.priority,
            location: check_length("location", &input.location, LOCATION_LEN.0, LOCATION_LEN.1)?,
            requester_id: actor.user_id,
        };

        let request = self.db.insert_request(new).await?;
        info!(request_id = request.id, requester = actor.user_id, "Request created");

        self.outbox
            .submit(Task::award(actor.user_id, rewards::CREATE_REQUEST, "create_request"));
        self.outbox
            .submit(Task::track(actor.user_id, Metric::RequestsCreated, Advance::By(1)));

        Ok(request)
    }

    pub async fn get(&self, request_id: RequestId) -> Result<HelpRequest, AppError> {
        self.db.get_request(request_id).await
    }

    pub async fn list(
        &self,
        filter: RequestFilter,
        window: PageWindow,
    ) -> Result<Page<HelpRequest>, AppError> {
        self.db.list_requests(filter, window).await
    }

    pub async fn update(
        &self,
        actor: &Principal,
        request_id: RequestId,
        input: UpdateRequest,
    ) -> Result<HelpRequest, AppError> {
        let request = self.db.get_request(request_id).await?;
        lifecycle::check_edit(&request, actor)?;

        let edit = RequestEdit {
            title: check_optional("title", input.title, TITLE_LEN.0, TITLE_LEN.1)?,
            description: check_optional(
                "description",
                input.description,
                DESCRIPTION_LEN.0,
                DESCRIPTION_LEN.1,
            )?,
            category_id: input.category_id,
            priority: input.priority,
            location: check_optional("location", input.location, LOCATION_LEN.0, LOCATION_LEN.1)?,
        };

        self.db.update_request(request_id, edit).await
    }

    pub async fn delete(&self, actor: &Principal, request_id: RequestId) -> Result<(), AppError> {
        let request = self.db.get_request(request_id).await?;
        lifecycle::check_delete(&request, actor)?;

        self.db.delete_request(request_id, request.status).await?;
        info!(request_id, by = actor.user_id, "Request deleted");

        Ok(())
    }

    async fn move_along(
        &self,
        actor: &Principal,
        request_id: RequestId,
        action: Action,
    ) -> Result<(HelpRequest, HelpRequest), AppError> {
        let request = self.db.get_request(request_id).await?;
        let transition = lifecycle::transition(&request, action, actor, Utc::now())?;
        let saved = self.db.save_transition(transition).await?;

        info!(
            request_id,
            by = actor.user_id,
            action = action.as_str(),
            status = %saved.status,
            "Request status changed"
        );

        Ok((request, saved))
    }

    pub async fn take(&self, actor: &Principal, request_id: RequestId) -> Result<HelpRequest, AppError> {
        let (_, request) = self.move_along(actor, request_id, Action::Take).await?;

        self.outbox
            .submit(Task::award(actor.user_id, rewards::TAKE_REQUEST, "take_request"));
        self.notify(
            request.requester_id,
            NotificationKind::RequestAccepted,
            &request,
            "A volunteer took your request",
        );

        Ok(request)
    }

    pub async fn complete(
        &self,
        actor: &Principal,
        request_id: RequestId,
    ) -> Result<HelpRequest, AppError> {
        let (_, request) = self.move_along(actor, request_id, Action::Complete).await?;
        let volunteer = request
            .assigned_to
            .ok_or_else(|| AppError::Internal("completed request without volunteer".into()))?;

        self.outbox.submit(Task::award(
            volunteer,
            rewards::completion(request.priority),
            "complete_request",
        ));
        self.outbox.submit(Task::award(
            request.requester_id,
            rewards::REQUESTER_COMPLETION,
            "request_completed",
        ));
        self.outbox
            .submit(Task::track(volunteer, Metric::RequestsCompleted, Advance::By(1)));

        for user_id in [request.requester_id, volunteer] {
            if user_id != actor.user_id {
                self.notify(
                    user_id,
                    NotificationKind::RequestCompleted,
                    &request,
                    "Request completed",
                );
            }
        }

        Ok(request)
    }

    pub async fn cancel(
        &self,
        actor: &Principal,
        request_id: RequestId,
    ) -> Result<HelpRequest, AppError> {
        let (before, request) = self.move_along(actor, request_id, Action::Cancel).await?;

        let affected = [Some(before.requester_id), before.assigned_to];
        for user_id in affected.into_iter().flatten() {
            if user_id != actor.user_id {
                self.notify(
                    user_id,
                    NotificationKind::RequestCancelled,
                    &request,
                    "Request cancelled",
                );
            }
        }

        Ok(request)
    }

    pub async fn rate(
        &self,
        actor: &Principal,
        request_id: RequestId,
        rating: i64,
        comment: String,
    ) -> Result<Rating, AppError> {
        let request = self.db.get_request(request_id).await?;
        let comment = comment.trim().to_string();
        let volunteer = lifecycle::check_rating(&request, actor, rating, &comment)?;

        let saved = self
            .db
            .insert_rating(NewRating {
                request_id,
                rater_id: actor.user_id,
                rated_id: volunteer,
                rating,
                comment,
            })
            .await?;

        if let Some(bonus) = rewards::rating_bonus(rating) {
            self.outbox.submit(Task::award(volunteer, bonus, "rating"));
        }
        if rating == 5 {
            self.outbox
                .submit(Task::track(volunteer, Metric::FiveStarRatings, Advance::By(1)));
        }

        Ok(saved)
    }

    pub async fn comments(&self, request_id: RequestId) -> Result<Vec<Comment>, AppError> {
        self.db.list_comments(request_id).await
    }

    pub async fn add_comment(
        &self,
        actor: &Principal,
        request_id: RequestId,
        text: &str,
    ) -> Result<Comment, AppError> {
        let text = check_length("text", text, COMMENT_LEN.0, COMMENT_LEN.1)?;
        let comment = self.db.insert_comment(request_id, actor.user_id, text).await?;

        self.outbox
            .submit(Task::award(actor.user_id, rewards::ADD_COMMENT, "comment"));
        self.outbox
            .submit(Task::track(actor.user_id, Metric::CommentsWritten, Advance::By(1)));

        Ok(comment)
    }

    pub async fn categories(&self) -> Result<Vec<Category>, AppError> {
        self.db.categories().await
    }

    pub async fn stats(&self) -> Result<RequestStats, AppError> {
        self.db.request_stats().await
    }
}
