//! # Domain Models
//!
//! Entities as stored in SQLite and returned over JSON. All JSON is camelCase.
//!
//! ## Invariants
//! - `HelpRequest::assigned_to` is set iff status is `in_progress` or `completed`
//! - `HelpRequest::completed_at` is set iff status is `completed`
//! - `UserGameProfile::level` is the largest level whose threshold fits the experience
//! - `UserAchievement::unlocked` implies `progress >= target`
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type UserId = i64;
pub type RequestId = i64;

#[derive(Error, Debug)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Enums persisted as their snake_case text form.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Volunteer,
    Admin,
}

text_enum!(Role, "role", {
    User => "user",
    Volunteer => "volunteer",
    Admin => "admin",
});

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn can_volunteer(&self) -> bool {
        matches!(self, Role::Volunteer | Role::Admin)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    New,
    InProgress,
    Completed,
    Cancelled,
}

text_enum!(RequestStatus, "request status", {
    New => "new",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

text_enum!(Priority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// What an achievement counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    RequestsCreated,
    RequestsCompleted,
    LevelReached,
    FiveStarRatings,
    CommentsWritten,
}

text_enum!(Metric, "metric", {
    RequestsCreated => "requests_created",
    RequestsCompleted => "requests_completed",
    LevelReached => "level_reached",
    FiveStarRatings => "five_star_ratings",
    CommentsWritten => "comments_written",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LevelUp,
    AchievementUnlocked,
    RequestAccepted,
    RequestCompleted,
    RequestCancelled,
}

text_enum!(NotificationKind, "notification kind", {
    LevelUp => "level_up",
    AchievementUnlocked => "achievement_unlocked",
    RequestAccepted => "request_accepted",
    RequestCompleted => "request_completed",
    RequestCancelled => "request_cancelled",
});

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub telegram_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub photo_url: String,
    pub phone: String,
    pub address: String,
    pub about: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpRequest {
    pub id: RequestId,
    pub title: String,
    pub description: String,
    pub status: RequestStatus,
    pub category_id: i64,
    pub priority: Priority,
    pub location: String,
    pub requester_id: UserId,
    pub assigned_to: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: i64,
    pub request_id: RequestId,
    pub rater_id: UserId,
    pub rated_id: UserId,
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGameProfile {
    pub user_id: UserId,
    pub level: i64,
    pub experience: i64,
    pub completed_requests: i64,
    pub created_requests: i64,
}

impl UserGameProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            level: 1,
            experience: 0,
            completed_requests: 0,
            created_requests: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub metric: Metric,
    pub target: i64,
    pub exp_reward: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievement {
    pub user_id: UserId,
    pub achievement_id: String,
    pub progress: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl UserAchievement {
    pub fn empty(user_id: UserId, achievement_id: &str) -> Self {
        Self {
            user_id,
            achievement_id: achievement_id.to_string(),
            progress: 0,
            unlocked: false,
            unlocked_at: None,
        }
    }
}

/// Catalog entry joined with one user's progress.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementStatus {
    #[serde(flatten)]
    pub achievement: Achievement,
    pub progress: i64,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub request_id: Option<RequestId>,
    pub achievement_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: UserId,
    pub username: String,
    pub first_name: String,
    pub photo_url: String,
    pub level: i64,
    pub experience: i64,
    pub completed_requests: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total_requests: i64,
    pub completed_requests: i64,
    pub pending_requests: i64,
    pub volunteers: i64,
    pub users: i64,
    pub average_rating: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: i64,
    pub total_pages: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_items: i64, page: i64, page_size: i64) -> Self {
        Self {
            items,
            total_items,
            total_pages: (total_items + page_size - 1) / page_size,
            page,
            page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            RequestStatus::New,
            RequestStatus::InProgress,
            RequestStatus::Completed,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("done".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn page_counts_partial_last_page() {
        let page = Page::new(vec![1, 2, 3], 21, 1, 10);
        assert_eq!(page.total_pages, 3);

        let empty: Page<i32> = Page::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn serializes_pagination_in_camel_case() {
        let json = serde_json::to_value(Page::new(vec!["a"], 1, 1, 20)).unwrap();
        assert_eq!(json["totalItems"], 1);
        assert_eq!(json["totalPages"], 1);
        assert_eq!(json["pageSize"], 20);
    }

    #[test]
    fn only_volunteers_and_admins_can_volunteer() {
        assert!(!Role::User.can_volunteer());
        assert!(Role::Volunteer.can_volunteer());
        assert!(Role::Admin.can_volunteer());
    }
}
