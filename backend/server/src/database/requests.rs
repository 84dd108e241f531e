use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter, types::Value};

use super::{Database, is_constraint_violation};
use crate::{
    error::AppError,
    lifecycle::Transition,
    models::{
        Category, Comment, HelpRequest, Page, Priority, Rating, RequestId, RequestStats,
        RequestStatus, UserId,
    },
    search::RequestFilter,
    utils::PageWindow,
};

const REQUEST_COLUMNS: &str = "id, title, description, status, category_id, priority, location, \
                               requester_id, assigned_to, created_at, updated_at, completed_at";

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<HelpRequest> {
    Ok(HelpRequest {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        category_id: row.get(4)?,
        priority: row.get(5)?,
        location: row.get(6)?,
        requester_id: row.get(7)?,
        assigned_to: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

fn load_request(conn: &Connection, request_id: RequestId) -> Result<HelpRequest, AppError> {
    conn.query_row(
        &format!("SELECT {REQUEST_COLUMNS} FROM help_requests WHERE id = ?1 AND is_deleted = 0"),
        [request_id],
        request_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("request"))
}

fn check_category(conn: &Connection, category_id: i64) -> Result<(), AppError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1)",
        [category_id],
        |row| row.get(0),
    )?;

    if exists {
        Ok(())
    } else {
        Err(AppError::invalid(format!("unknown category {category_id}")))
    }
}

/// Zero rows changed: either the request vanished or its status moved on.
fn lost_race(conn: &Connection, request_id: RequestId) -> AppError {
    match load_request(conn, request_id) {
        Ok(_) => AppError::conflict("request was changed by someone else"),
        Err(e) => e,
    }
}

#[derive(Clone, Debug)]
pub struct NewRequest {
    pub title: String,
    pub description: String,
    pub category_id: i64,
    pub priority: Priority,
    pub location: String,
    pub requester_id: UserId,
}

#[derive(Clone, Debug, Default)]
pub struct RequestEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<Priority>,
    pub location: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewRating {
    pub request_id: RequestId,
    pub rater_id: UserId,
    pub rated_id: UserId,
    pub rating: i64,
    pub comment: String,
}

impl Database {
    pub async fn insert_request(&self, new: NewRequest) -> Result<HelpRequest, AppError> {
        self.call(move |conn| {
            let now = Utc::now();
            let tx = conn.transaction()?;
            check_category(&tx, new.category_id)?;

            tx.execute(
                "INSERT INTO help_requests
                     (title, description, status, category_id, priority, location, requester_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    new.title,
                    new.description,
                    RequestStatus::New,
                    new.category_id,
                    new.priority,
                    new.location,
                    new.requester_id,
                    now
                ],
            )?;
            let request_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT OR IGNORE INTO user_stats (user_id) VALUES (?1)",
                [new.requester_id],
            )?;
            tx.execute(
                "UPDATE user_stats SET created_requests = created_requests + 1 WHERE user_id = ?1",
                [new.requester_id],
            )?;

            let request = load_request(&tx, request_id)?;
            tx.commit()?;

            Ok(request)
        })
        .await
    }

    pub async fn get_request(&self, request_id: RequestId) -> Result<HelpRequest, AppError> {
        self.call(move |conn| load_request(conn, request_id)).await
    }

    /// Applies the edit only while the request is still `new`.
    pub async fn update_request(
        &self,
        request_id: RequestId,
        edit: RequestEdit,
    ) -> Result<HelpRequest, AppError> {
        self.call(move |conn| {
            if let Some(category_id) = edit.category_id {
                check_category(conn, category_id)?;
            }

            let changed = conn.execute(
                "UPDATE help_requests SET
                     title       = COALESCE(?1, title),
                     description = COALESCE(?2, description),
                     category_id = COALESCE(?3, category_id),
                     priority    = COALESCE(?4, priority),
                     location    = COALESCE(?5, location),
                     updated_at  = ?6
                 WHERE id = ?7 AND status = 'new' AND is_deleted = 0",
                params![
                    edit.title,
                    edit.description,
                    edit.category_id,
                    edit.priority,
                    edit.location,
                    Utc::now(),
                    request_id
                ],
            )?;
            if changed == 0 {
                return Err(lost_race(conn, request_id));
            }

            load_request(conn, request_id)
        })
        .await
    }

    /// Soft delete, guarded by the status the caller checked against.
    pub async fn delete_request(
        &self,
        request_id: RequestId,
        expected: RequestStatus,
    ) -> Result<(), AppError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE help_requests SET is_deleted = 1, updated_at = ?1
                 WHERE id = ?2 AND status = ?3 AND is_deleted = 0",
                params![Utc::now(), request_id, expected],
            )?;
            if changed == 0 {
                return Err(lost_race(conn, request_id));
            }

            Ok(())
        })
        .await
    }

    /// Persists a lifecycle transition. The row must still look like
    /// `transition.before`, otherwise the caller lost a race and gets a conflict.
    /// Completing also bumps the volunteer's completed counter.
    pub async fn save_transition(&self, transition: Transition) -> Result<HelpRequest, AppError> {
        self.call(move |conn| {
            let Transition { from, before, after } = transition;
            let tx = conn.transaction()?;

            let changed = tx.execute(
                "UPDATE help_requests SET
                     status       = ?1,
                     assigned_to  = ?2,
                     updated_at   = ?3,
                     completed_at = ?4
                 WHERE id = ?5 AND status = ?6 AND assigned_to IS ?7 AND is_deleted = 0",
                params![
                    after.status,
                    after.assigned_to,
                    after.updated_at,
                    after.completed_at,
                    after.id,
                    from,
                    before.assigned_to
                ],
            )?;
            if changed == 0 {
                return Err(lost_race(&tx, after.id));
            }

            if let (RequestStatus::Completed, Some(volunteer)) = (after.status, after.assigned_to) {
                tx.execute(
                    "INSERT OR IGNORE INTO user_stats (user_id) VALUES (?1)",
                    [volunteer],
                )?;
                tx.execute(
                    "UPDATE user_stats SET completed_requests = completed_requests + 1 WHERE user_id = ?1",
                    [volunteer],
                )?;
            }

            let request = load_request(&tx, after.id)?;
            tx.commit()?;

            Ok(request)
        })
        .await
    }

    pub async fn list_requests(
        &self,
        filter: RequestFilter,
        window: PageWindow,
    ) -> Result<Page<HelpRequest>, AppError> {
        self.call(move |conn| {
            let (clause, mut values) = filter.to_sql();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM help_requests WHERE {clause}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            values.push(Value::Integer(window.page_size));
            values.push(Value::Integer(window.offset));
            let limit = values.len() - 1;
            let offset = values.len();

            let mut statement = conn.prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM help_requests WHERE {clause}
                 ORDER BY created_at DESC, id DESC LIMIT ?{limit} OFFSET ?{offset}"
            ))?;
            let items = statement
                .query_map(params_from_iter(values.iter()), request_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Page::new(items, total, window.page, window.page_size))
        })
        .await
    }

    pub async fn list_comments(&self, request_id: RequestId) -> Result<Vec<Comment>, AppError> {
        self.call(move |conn| {
            load_request(conn, request_id)?;

            let mut statement = conn.prepare(
                "SELECT id, request_id, user_id, text, created_at FROM request_comments
                 WHERE request_id = ?1 ORDER BY created_at, id",
            )?;
            let comments = statement
                .query_map([request_id], |row| {
                    Ok(Comment {
                        id: row.get(0)?,
                        request_id: row.get(1)?,
                        user_id: row.get(2)?,
                        text: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(comments)
        })
        .await
    }

    pub async fn insert_comment(
        &self,
        request_id: RequestId,
        user_id: UserId,
        text: String,
    ) -> Result<Comment, AppError> {
        self.call(move |conn| {
            load_request(conn, request_id)?;

            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO request_comments (request_id, user_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![request_id, user_id, text, created_at],
            )?;

            Ok(Comment {
                id: conn.last_insert_rowid(),
                request_id,
                user_id,
                text,
                created_at,
            })
        })
        .await
    }

    /// One rating per request, enforced by a unique index.
    pub async fn insert_rating(&self, new: NewRating) -> Result<Rating, AppError> {
        self.call(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO request_ratings (request_id, rater_id, rated_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.request_id,
                    new.rater_id,
                    new.rated_id,
                    new.rating,
                    new.comment,
                    created_at
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    AppError::conflict("request has already been rated")
                } else {
                    AppError::Storage(e)
                }
            })?;

            Ok(Rating {
                id: conn.last_insert_rowid(),
                request_id: new.request_id,
                rater_id: new.rater_id,
                rated_id: new.rated_id,
                rating: new.rating,
                comment: new.comment,
                created_at,
            })
        })
        .await
    }

    pub async fn categories(&self) -> Result<Vec<Category>, AppError> {
        self.call(|conn| {
            let mut statement =
                conn.prepare("SELECT id, name, description, icon, color FROM categories ORDER BY id")?;
            let categories = statement
                .query_map([], |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        icon: row.get(3)?,
                        color: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(categories)
        })
        .await
    }

    pub async fn request_stats(&self) -> Result<RequestStats, AppError> {
        self.call(|conn| {
            let (total_requests, completed_requests, pending_requests) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'completed'), 0),
                        COALESCE(SUM(status = 'new'), 0)
                 FROM help_requests WHERE is_deleted = 0",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?;

            let (users, volunteers) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(role = 'volunteer'), 0) FROM users",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?;

            let average_rating: f64 = conn.query_row(
                "SELECT COALESCE(AVG(rating), 0.0) FROM request_ratings",
                [],
                |row| row.get(0),
            )?;

            Ok(RequestStats {
                total_requests,
                completed_requests,
                pending_requests,
                volunteers,
                users,
                average_rating,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        auth::Principal,
        database::users::tests::identity,
        lifecycle::{Action, transition},
        models::Role,
        utils::window,
    };

    async fn setup() -> (Database, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let requester = db.upsert_user(identity("1")).await.unwrap();
        let volunteer = db.upsert_user(identity("2")).await.unwrap();
        db.set_role(volunteer.id, Role::Volunteer).await.unwrap();
        (db, requester.id, volunteer.id)
    }

    fn new_request(requester_id: UserId) -> NewRequest {
        NewRequest {
            title: "Carry groceries".to_string(),
            description: "Bags from the store to the fourth floor".to_string(),
            category_id: 1,
            priority: Priority::High,
            location: "Main st 1".to_string(),
            requester_id,
        }
    }

    #[tokio::test]
    async fn insert_starts_new_and_counts_for_requester() {
        let (db, requester, _) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();

        assert_eq!(request.status, RequestStatus::New);
        assert_eq!(request.assigned_to, None);

        let profile = db.game_profile(requester).await.unwrap();
        assert_eq!(profile.created_requests, 1);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let (db, requester, _) = setup().await;
        let result = db
            .insert_request(NewRequest {
                category_id: 99,
                ..new_request(requester)
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn stale_transition_loses() {
        let (db, requester, volunteer) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();
        let actor = Principal {
            user_id: volunteer,
            role: Role::Volunteer,
        };

        let first = transition(&request, Action::Take, &actor, Utc::now()).unwrap();
        let second = transition(&request, Action::Take, &actor, Utc::now()).unwrap();

        let saved = db.save_transition(first).await.unwrap();
        assert_eq!(saved.status, RequestStatus::InProgress);
        assert_eq!(saved.assigned_to, Some(volunteer));

        assert!(matches!(
            db.save_transition(second).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_takes_have_one_winner() {
        let (db, requester, volunteer) = setup().await;
        let other = db.upsert_user(identity("3")).await.unwrap();
        db.set_role(other.id, Role::Volunteer).await.unwrap();
        let request = Arc::new(db.insert_request(new_request(requester)).await.unwrap());

        let mut handles = Vec::new();
        for user_id in [volunteer, other.id] {
            let db = db.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                let actor = Principal {
                    user_id,
                    role: Role::Volunteer,
                };
                let t = transition(&request, Action::Take, &actor, Utc::now())?;
                db.save_transition(t).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AppError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((wins, conflicts), (1, 1));
    }

    #[tokio::test]
    async fn completion_counts_for_volunteer() {
        let (db, requester, volunteer) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();
        let actor = Principal {
            user_id: volunteer,
            role: Role::Volunteer,
        };

        let taken = db
            .save_transition(transition(&request, Action::Take, &actor, Utc::now()).unwrap())
            .await
            .unwrap();
        let done = db
            .save_transition(transition(&taken, Action::Complete, &actor, Utc::now()).unwrap())
            .await
            .unwrap();

        assert_eq!(done.status, RequestStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(db.game_profile(volunteer).await.unwrap().completed_requests, 1);
    }

    #[tokio::test]
    async fn edits_are_refused_once_taken() {
        let (db, requester, volunteer) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();

        let edited = db
            .update_request(
                request.id,
                RequestEdit {
                    title: Some("Carry two bags".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.title, "Carry two bags");
        assert_eq!(edited.location, request.location);

        let actor = Principal {
            user_id: volunteer,
            role: Role::Volunteer,
        };
        db.save_transition(transition(&edited, Action::Take, &actor, Utc::now()).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            db.update_request(request.id, RequestEdit::default()).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn deleted_requests_disappear() {
        let (db, requester, _) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();

        db.delete_request(request.id, RequestStatus::New).await.unwrap();

        assert!(matches!(
            db.get_request(request.id).await,
            Err(AppError::NotFound("request"))
        ));
        let page = db
            .list_requests(RequestFilter::default(), window(1, 20))
            .await
            .unwrap();
        assert_eq!(page.total_items, 0);
    }

    #[tokio::test]
    async fn lists_with_filters_and_pages() {
        let (db, requester, _) = setup().await;
        for i in 0..5 {
            db.insert_request(NewRequest {
                title: format!("Request number {i}"),
                priority: if i % 2 == 0 { Priority::High } else { Priority::Low },
                ..new_request(requester)
            })
            .await
            .unwrap();
        }

        let high = db
            .list_requests(
                RequestFilter {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
                window(1, 2),
            )
            .await
            .unwrap();
        assert_eq!(high.total_items, 3);
        assert_eq!(high.total_pages, 2);
        assert_eq!(high.items.len(), 2);

        let found = db
            .list_requests(
                RequestFilter {
                    text: Some("number 3".to_string()),
                    ..Default::default()
                },
                window(1, 20),
            )
            .await
            .unwrap();
        assert_eq!(found.total_items, 1);
        assert_eq!(found.items[0].title, "Request number 3");
    }

    #[tokio::test]
    async fn second_rating_conflicts() {
        let (db, requester, volunteer) = setup().await;
        let request = db.insert_request(new_request(requester)).await.unwrap();
        let rating = NewRating {
            request_id: request.id,
            rater_id: requester,
            rated_id: volunteer,
            rating: 5,
            comment: String::new(),
        };

        db.insert_rating(rating.clone()).await.unwrap();
        assert!(matches!(
            db.insert_rating(rating).await,
            Err(AppError::Conflict(_))
        ));

        let stats = db.request_stats().await.unwrap();
        assert_eq!(stats.average_rating, 5.0);
        assert_eq!(stats.volunteers, 1);
        assert_eq!(stats.users, 2);
    }

    #[tokio::test]
    async fn comments_need_an_existing_request() {
        let (db, requester, _) = setup().await;
        assert!(matches!(
            db.insert_comment(404, requester, "hello".to_string()).await,
            Err(AppError::NotFound("request"))
        ));

        let request = db.insert_request(new_request(requester)).await.unwrap();
        db.insert_comment(request.id, requester, "hello".to_string())
            .await
            .unwrap();
        assert_eq!(db.list_comments(request.id).await.unwrap().len(), 1);
    }
}
