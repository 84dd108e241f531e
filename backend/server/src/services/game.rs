//! # Game
//!
//! Experience, levels, achievements and notifications.
//!
//! ## Flow
//! - `add_experience` stores the new total. A level-up queues a notification
//!   and progress for level achievements
//! - `track` moves every achievement counting a metric. An unlock queues its
//!   experience reward and a notification
//! - Nothing here calls back into itself. Follow-ups go through the outbox, so
//!   an unlock that levels a user up that unlocks another achievement is just
//!   a few more tasks
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    achievements::Advance,
    auth::Principal,
    database::Database,
    error::AppError,
    leveling::{Progression, threshold},
    models::{
        Achievement, AchievementStatus, LeaderboardEntry, Metric, Notification, NotificationKind,
        Page, UserAchievement, UserGameProfile, UserId,
    },
    outbox::{Notice, Task, TaskSink},
    utils::PageWindow,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProfile {
    #[serde(flatten)]
    pub stats: UserGameProfile,
    pub current_level_experience: i64,
    pub next_level_experience: i64,
    pub unlocked_achievements: usize,
    pub achievements: Vec<AchievementStatus>,
}

#[derive(Clone)]
pub struct GameService {
    db: Database,
    outbox: Arc<dyn TaskSink>,
}

impl GameService {
    pub fn new(db: Database, outbox: Arc<dyn TaskSink>) -> Self {
        Self { db, outbox }
    }

    pub async fn add_experience(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
    ) -> Result<Progression, AppError> {
        let progression = self.db.add_experience(user_id, amount).await?;

        #[cfg(feature = "verbose")]
        info!(user_id, amount, reason, total = progression.experience, "Experience added");

        if progression.leveled_up {
            info!(user_id, reason, level = progression.new_level, "Level up");

            self.outbox.submit(Task::Notify(Notice {
                user_id,
                kind: NotificationKind::LevelUp,
                title: "Level up!".to_string(),
                message: format!("You reached level {}", progression.new_level),
                request_id: None,
                achievement_id: None,
            }));
            self.outbox.submit(Task::track(
                user_id,
                Metric::LevelReached,
                Advance::Reach(progression.new_level),
            ));
        }

        Ok(progression)
    }

    /// Manual award from the API. Users may only award themselves unless admin.
    pub async fn grant_experience(
        &self,
        actor: &Principal,
        user_id: UserId,
        amount: i64,
    ) -> Result<Progression, AppError> {
        actor.check_acts_for(user_id)?;
        self.add_experience(user_id, amount, "manual").await
    }

    /// Moves every achievement counting `metric`.
    pub async fn track(
        &self,
        user_id: UserId,
        metric: Metric,
        advance: Advance,
    ) -> Result<Vec<UserAchievement>, AppError> {
        let mut records = Vec::new();

        for achievement in self.db.achievements_for(metric).await? {
            records.push(self.advance(user_id, achievement.id, advance).await?);
        }

        Ok(records)
    }

    pub async fn update_progress(
        &self,
        actor: &Principal,
        user_id: UserId,
        achievement_id: String,
        delta: i64,
    ) -> Result<UserAchievement, AppError> {
        actor.check_acts_for(user_id)?;
        self.advance(user_id, achievement_id, Advance::By(delta))
            .await
    }

    /// Idempotent, unlocking twice rewards once.
    pub async fn unlock(
        &self,
        actor: &Principal,
        user_id: UserId,
        achievement_id: String,
    ) -> Result<UserAchievement, AppError> {
        actor.check_acts_for(user_id)?;
        self.advance(user_id, achievement_id, Advance::Unlock).await
    }

    async fn advance(
        &self,
        user_id: UserId,
        achievement_id: String,
        advance: Advance,
    ) -> Result<UserAchievement, AppError> {
        let (achievement, update) = self
            .db
            .advance_achievement(user_id, achievement_id, advance)
            .await?;

        if update.newly_unlocked {
            self.on_unlock(user_id, &achievement);
        }

        Ok(update.record)
    }

    fn on_unlock(&self, user_id: UserId, achievement: &Achievement) {
        info!(user_id, achievement = %achievement.id, "Achievement unlocked");

        if achievement.exp_reward > 0 {
            self.outbox
                .submit(Task::award(user_id, achievement.exp_reward, "achievement"));
        }

        self.outbox.submit(Task::Notify(Notice {
            user_id,
            kind: NotificationKind::AchievementUnlocked,
            title: format!("Achievement unlocked: {}", achievement.title),
            message: achievement.description.clone(),
            request_id: None,
            achievement_id: Some(achievement.id.clone()),
        }));
    }

    pub async fn notify(&self, notice: Notice) -> Result<Notification, AppError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: notice.user_id,
            kind: notice.kind,
            title: notice.title,
            message: notice.message,
            request_id: notice.request_id,
            achievement_id: notice.achievement_id,
            is_read: false,
            created_at: Utc::now(),
        };

        self.db.insert_notification(notification.clone()).await?;

        Ok(notification)
    }

    /// Entry point for the outbox worker.
    pub async fn apply(&self, task: Task) -> Result<(), AppError> {
        match task {
            Task::AwardExperience {
                user_id,
                amount,
                reason,
            } => self.add_experience(user_id, amount, reason).await.map(drop),
            Task::Track {
                user_id,
                metric,
                advance,
            } => self.track(user_id, metric, advance).await.map(drop),
            Task::Notify(notice) => self.notify(notice).await.map(drop),
        }
    }

    pub async fn profile(&self, user_id: UserId) -> Result<GameProfile, AppError> {
        let stats = self.db.game_profile(user_id).await?;
        let achievements = self.db.achievement_statuses(user_id).await?;

        Ok(GameProfile {
            current_level_experience: threshold(stats.level),
            next_level_experience: threshold(stats.level + 1),
            unlocked_achievements: achievements.iter().filter(|a| a.unlocked).count(),
            achievements,
            stats,
        })
    }

    pub async fn achievements(&self, user_id: UserId) -> Result<Vec<AchievementStatus>, AppError> {
        self.db.achievement_statuses(user_id).await
    }

    pub async fn leaderboard(&self, window: PageWindow) -> Result<Page<LeaderboardEntry>, AppError> {
        self.db.leaderboard(window).await
    }

    pub async fn notifications(
        &self,
        user_id: UserId,
        unread_only: bool,
        window: PageWindow,
    ) -> Result<Page<Notification>, AppError> {
        self.db
            .list_notifications(user_id, unread_only, window)
            .await
    }

    pub async fn mark_read(&self, user_id: UserId, notification_id: String) -> Result<(), AppError> {
        self.db.mark_notification_read(user_id, notification_id).await
    }

    pub async fn mark_all_read(&self, user_id: UserId) -> Result<usize, AppError> {
        self.db.mark_all_notifications_read(user_id).await
    }
}
