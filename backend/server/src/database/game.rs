use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Database;
use crate::{
    achievements::{Advance, ProgressUpdate},
    error::AppError,
    leveling::{self, Progression},
    models::{
        Achievement, AchievementStatus, LeaderboardEntry, Metric, Notification, Page,
        UserAchievement, UserGameProfile, UserId,
    },
    utils::PageWindow,
};

const ACHIEVEMENT_COLUMNS: &str = "id, title, description, metric, target, exp_reward";

fn achievement_from_row(row: &Row<'_>) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        metric: row.get(3)?,
        target: row.get(4)?,
        exp_reward: row.get(5)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        request_id: row.get(5)?,
        achievement_id: row.get(6)?,
        is_read: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn check_user(conn: &Connection, user_id: UserId) -> Result<(), AppError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [user_id],
        |row| row.get(0),
    )?;

    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("user"))
    }
}

/// Loads the stats row, creating the level 1 default on first access.
fn load_profile(conn: &Connection, user_id: UserId) -> Result<UserGameProfile, AppError> {
    check_user(conn, user_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO user_stats (user_id) VALUES (?1)",
        [user_id],
    )?;

    Ok(conn.query_row(
        "SELECT user_id, level, experience, completed_requests, created_requests
         FROM user_stats WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(UserGameProfile {
                user_id: row.get(0)?,
                level: row.get(1)?,
                experience: row.get(2)?,
                completed_requests: row.get(3)?,
                created_requests: row.get(4)?,
            })
        },
    )?)
}

fn load_achievement(conn: &Connection, achievement_id: &str) -> Result<Achievement, AppError> {
    conn.query_row(
        &format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE id = ?1"),
        [achievement_id],
        achievement_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("achievement"))
}

fn load_user_achievement(
    conn: &Connection,
    user_id: UserId,
    achievement_id: &str,
) -> Result<UserAchievement, AppError> {
    let record = conn
        .query_row(
            "SELECT progress, unlocked, unlocked_at FROM user_achievements
             WHERE user_id = ?1 AND achievement_id = ?2",
            params![user_id, achievement_id],
            |row| {
                Ok(UserAchievement {
                    user_id,
                    achievement_id: achievement_id.to_string(),
                    progress: row.get(0)?,
                    unlocked: row.get(1)?,
                    unlocked_at: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(record.unwrap_or_else(|| UserAchievement::empty(user_id, achievement_id)))
}

impl Database {
    pub async fn game_profile(&self, user_id: UserId) -> Result<UserGameProfile, AppError> {
        self.call(move |conn| load_profile(conn, user_id)).await
    }

    /// Read, level and write in one transaction so concurrent awards add up.
    pub async fn add_experience(&self, user_id: UserId, delta: i64) -> Result<Progression, AppError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let profile = load_profile(&tx, user_id)?;
            let progression = leveling::add_experience(profile.level, profile.experience, delta)?;

            tx.execute(
                "UPDATE user_stats SET level = ?1, experience = ?2 WHERE user_id = ?3",
                params![progression.new_level, progression.experience, user_id],
            )?;
            tx.commit()?;

            Ok(progression)
        })
        .await
    }

    pub async fn achievements_for(&self, metric: Metric) -> Result<Vec<Achievement>, AppError> {
        self.call(move |conn| {
            let mut statement = conn.prepare(&format!(
                "SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE metric = ?1 ORDER BY target, id"
            ))?;
            let achievements = statement
                .query_map([metric], achievement_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(achievements)
        })
        .await
    }

    /// Moves one user's progress on one achievement and stores the result.
    pub async fn advance_achievement(
        &self,
        user_id: UserId,
        achievement_id: String,
        advance: Advance,
    ) -> Result<(Achievement, ProgressUpdate), AppError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            check_user(&tx, user_id)?;
            let achievement = load_achievement(&tx, &achievement_id)?;
            let record = load_user_achievement(&tx, user_id, &achievement_id)?;

            let update = advance.apply(record, achievement.target, Utc::now());

            tx.execute(
                "INSERT INTO user_achievements (user_id, achievement_id, progress, unlocked, unlocked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, achievement_id) DO UPDATE SET
                     progress    = excluded.progress,
                     unlocked    = excluded.unlocked,
                     unlocked_at = excluded.unlocked_at",
                params![
                    user_id,
                    achievement_id,
                    update.record.progress,
                    update.record.unlocked,
                    update.record.unlocked_at
                ],
            )?;
            tx.commit()?;

            Ok((achievement, update))
        })
        .await
    }

    /// Whole catalog with the user's progress, zero where nothing is stored yet.
    pub async fn achievement_statuses(
        &self,
        user_id: UserId,
    ) -> Result<Vec<AchievementStatus>, AppError> {
        self.call(move |conn| {
            check_user(conn, user_id)?;

            let mut statement = conn.prepare(
                "SELECT a.id, a.title, a.description, a.metric, a.target, a.exp_reward,
                        COALESCE(ua.progress, 0), COALESCE(ua.unlocked, 0), ua.unlocked_at
                 FROM achievements a
                 LEFT JOIN user_achievements ua ON ua.achievement_id = a.id AND ua.user_id = ?1
                 ORDER BY a.metric, a.target, a.id",
            )?;
            let statuses = statement
                .query_map([user_id], |row| {
                    Ok(AchievementStatus {
                        achievement: achievement_from_row(row)?,
                        progress: row.get(6)?,
                        unlocked: row.get(7)?,
                        unlocked_at: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(statuses)
        })
        .await
    }

    /// Ordered by experience, ties broken by user id. Users who never gained any
    /// experience are left out.
    pub async fn leaderboard(&self, window: PageWindow) -> Result<Page<LeaderboardEntry>, AppError> {
        self.call(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM user_stats WHERE experience > 0",
                [],
                |row| row.get(0),
            )?;

            let mut statement = conn.prepare(
                "SELECT s.user_id, u.username, u.first_name, u.photo_url,
                        s.level, s.experience, s.completed_requests
                 FROM user_stats s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.experience > 0
                 ORDER BY s.experience DESC, s.user_id ASC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = statement
                .query_map([window.page_size, window.offset], |row| {
                    Ok(LeaderboardEntry {
                        rank: 0,
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        photo_url: row.get(3)?,
                        level: row.get(4)?,
                        experience: row.get(5)?,
                        completed_requests: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let items = rows
                .into_iter()
                .zip(window.offset + 1..)
                .map(|(entry, rank)| LeaderboardEntry { rank, ..entry })
                .collect();

            Ok(Page::new(items, total, window.page, window.page_size))
        })
        .await
    }

    pub async fn insert_notification(&self, notification: Notification) -> Result<(), AppError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO notifications
                     (id, user_id, kind, title, message, request_id, achievement_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    notification.id,
                    notification.user_id,
                    notification.kind,
                    notification.title,
                    notification.message,
                    notification.request_id,
                    notification.achievement_id,
                    notification.is_read,
                    notification.created_at
                ],
            )?;

            Ok(())
        })
        .await
    }

    /// Newest first.
    pub async fn list_notifications(
        &self,
        user_id: UserId,
        unread_only: bool,
        window: PageWindow,
    ) -> Result<Page<Notification>, AppError> {
        self.call(move |conn| {
            let filter = if unread_only {
                "user_id = ?1 AND is_read = 0"
            } else {
                "user_id = ?1"
            };

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM notifications WHERE {filter}"),
                [user_id],
                |row| row.get(0),
            )?;

            let mut statement = conn.prepare(&format!(
                "SELECT id, user_id, kind, title, message, request_id, achievement_id, is_read, created_at
                 FROM notifications WHERE {filter}
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let items = statement
                .query_map(
                    params![user_id, window.page_size, window.offset],
                    notification_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Page::new(items, total, window.page, window.page_size))
        })
        .await
    }

    /// Only the owner's notifications can be marked.
    pub async fn mark_notification_read(
        &self,
        user_id: UserId,
        notification_id: String,
    ) -> Result<(), AppError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
                params![notification_id, user_id],
            )?;
            if changed == 0 {
                return Err(AppError::NotFound("notification"));
            }

            Ok(())
        })
        .await
    }

    pub async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<usize, AppError> {
        self.call(move |conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{database::users::tests::identity, models::NotificationKind, utils::window};

    fn notification(user_id: UserId, title: &str) -> Notification {
        Notification {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind: NotificationKind::LevelUp,
            title: title.to_string(),
            message: String::new(),
            request_id: None,
            achievement_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn profile_defaults_to_level_one() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user(identity("1")).await.unwrap();

        let profile = db.game_profile(user.id).await.unwrap();
        assert_eq!(profile, UserGameProfile::new(user.id));

        assert!(matches!(
            db.game_profile(404).await,
            Err(AppError::NotFound("user"))
        ));
    }

    #[tokio::test]
    async fn experience_accumulates_and_levels() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user(identity("1")).await.unwrap();

        let first = db.add_experience(user.id, 350).await.unwrap();
        assert!(!first.leveled_up);

        let second = db.add_experience(user.id, 50).await.unwrap();
        assert!(second.leveled_up);
        assert_eq!(second.new_level, 2);

        let profile = db.game_profile(user.id).await.unwrap();
        assert_eq!((profile.level, profile.experience), (2, 400));
    }

    #[tokio::test]
    async fn progress_is_stored_and_unlocks_once() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user(identity("1")).await.unwrap();

        let (achievement, first) = db
            .advance_achievement(user.id, "helping_hand".to_string(), Advance::By(1))
            .await
            .unwrap();
        assert_eq!(achievement.target, 1);
        assert!(first.newly_unlocked);

        let (_, second) = db
            .advance_achievement(user.id, "helping_hand".to_string(), Advance::By(1))
            .await
            .unwrap();
        assert!(!second.newly_unlocked);
        assert_eq!(second.record.unlocked_at, first.record.unlocked_at);
    }

    #[tokio::test]
    async fn unknown_achievement_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user(identity("1")).await.unwrap();

        assert!(matches!(
            db.advance_achievement(user.id, "nope".to_string(), Advance::Unlock)
                .await,
            Err(AppError::NotFound("achievement"))
        ));
    }

    #[tokio::test]
    async fn statuses_cover_whole_catalog() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user(identity("1")).await.unwrap();
        db.advance_achievement(user.id, "active_participant".to_string(), Advance::By(2))
            .await
            .unwrap();

        let statuses = db.achievement_statuses(user.id).await.unwrap();
        assert_eq!(statuses.len(), crate::achievements::CATALOG.len());

        let active = statuses
            .iter()
            .find(|s| s.achievement.id == "active_participant")
            .unwrap();
        assert_eq!(active.progress, 2);
        assert!(!active.unlocked);
    }

    #[tokio::test]
    async fn leaderboard_ranks_by_experience_then_id() {
        let db = Database::open_in_memory().unwrap();
        let a = db.upsert_user(identity("1")).await.unwrap();
        let b = db.upsert_user(identity("2")).await.unwrap();
        let c = db.upsert_user(identity("3")).await.unwrap();
        db.upsert_user(identity("4")).await.unwrap();

        db.add_experience(a.id, 100).await.unwrap();
        db.add_experience(b.id, 300).await.unwrap();
        db.add_experience(c.id, 100).await.unwrap();

        let page = db.leaderboard(window(1, 10)).await.unwrap();
        let order: Vec<_> = page.items.iter().map(|e| (e.rank, e.user_id)).collect();
        assert_eq!(order, vec![(1, b.id), (2, a.id), (3, c.id)]);
        assert_eq!(page.total_items, 3);

        let second = db.leaderboard(window(2, 2)).await.unwrap();
        assert_eq!(second.items[0].rank, 3);
        assert_eq!(second.items[0].user_id, c.id);
    }

    #[tokio::test]
    async fn notifications_are_private_to_their_owner() {
        let db = Database::open_in_memory().unwrap();
        let owner = db.upsert_user(identity("1")).await.unwrap();
        let other = db.upsert_user(identity("2")).await.unwrap();

        let first = notification(owner.id, "first");
        let first_id = first.id.clone();
        db.insert_notification(first).await.unwrap();
        db.insert_notification(notification(owner.id, "second"))
            .await
            .unwrap();

        assert!(matches!(
            db.mark_notification_read(other.id, first_id.clone()).await,
            Err(AppError::NotFound("notification"))
        ));

        db.mark_notification_read(owner.id, first_id).await.unwrap();
        let unread = db.list_notifications(owner.id, true, window(1, 20)).await.unwrap();
        assert_eq!(unread.total_items, 1);
        assert_eq!(unread.items[0].title, "second");

        assert_eq!(db.mark_all_notifications_read(owner.id).await.unwrap(), 1);
        let all = db.list_notifications(owner.id, false, window(1, 20)).await.unwrap();
        assert!(all.items.iter().all(|n| n.is_read));
    }
}
