//! # Achievements
//!
//! Progress tracking against a per-achievement `target`, plus the catalog that
//! seeds the `achievements` table on startup. Once seeded, the table is the
//! source of truth for targets and rewards.
use chrono::{DateTime, Utc};

use crate::models::{Achievement, Metric, UserAchievement};

pub struct AchievementDef {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub metric: Metric,
    pub target: i64,
    pub exp_reward: i64,
}

impl AchievementDef {
    pub fn to_achievement(&self) -> Achievement {
        Achievement {
            id: self.id.to_string(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            metric: self.metric,
            target: self.target,
            exp_reward: self.exp_reward,
        }
    }
}

pub const CATALOG: &[AchievementDef] = &[
    AchievementDef {
        id: "first_steps",
        title: "First steps",
        description: "Create your first help request",
        metric: Metric::RequestsCreated,
        target: 1,
        exp_reward: 50,
    },
    AchievementDef {
        id: "helping_hand",
        title: "Helping hand",
        description: "Complete your first request as a volunteer",
        metric: Metric::RequestsCompleted,
        target: 1,
        exp_reward: 50,
    },
    AchievementDef {
        id: "active_participant",
        title: "Active participant",
        description: "Complete 5 requests as a volunteer",
        metric: Metric::RequestsCompleted,
        target: 5,
        exp_reward: 100,
    },
    AchievementDef {
        id: "legend",
        title: "Legend",
        description: "Complete 20 requests as a volunteer",
        metric: Metric::RequestsCompleted,
        target: 20,
        exp_reward: 500,
    },
    AchievementDef {
        id: "expert",
        title: "Expert",
        description: "Reach level 5",
        metric: Metric::LevelReached,
        target: 5,
        exp_reward: 200,
    },
    AchievementDef {
        id: "explorer",
        title: "Explorer",
        description: "Leave 10 comments on requests",
        metric: Metric::CommentsWritten,
        target: 10,
        exp_reward: 75,
    },
    AchievementDef {
        id: "mentor",
        title: "Mentor",
        description: "Receive 10 five-star ratings",
        metric: Metric::FiveStarRatings,
        target: 10,
        exp_reward: 250,
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub record: UserAchievement,
    pub newly_unlocked: bool,
}

/// Applies `delta` to a progress record. Negative deltas never move progress
/// backwards and progress is capped at `target`. An unlocked record comes back
/// untouched.
pub fn update_progress(
    record: UserAchievement,
    target: i64,
    delta: i64,
    now: DateTime<Utc>,
) -> ProgressUpdate {
    if record.unlocked {
        return ProgressUpdate {
            record,
            newly_unlocked: false,
        };
    }

    let progress = record
        .progress
        .max(record.progress.saturating_add(delta))
        .min(target);
    let newly_unlocked = progress >= target;

    ProgressUpdate {
        record: UserAchievement {
            progress,
            unlocked: newly_unlocked,
            unlocked_at: newly_unlocked.then_some(now),
            ..record
        },
        newly_unlocked,
    }
}

/// Jumps straight to the target.
pub fn unlock_now(record: UserAchievement, target: i64, now: DateTime<Utc>) -> ProgressUpdate {
    let delta = target.saturating_sub(record.progress);
    update_progress(record, target, delta, now)
}

/// How an event moves an achievement along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// Counters: one more request, one more comment.
    By(i64),
    /// Gauges like the current level. Turned into the delta from stored progress.
    Reach(i64),
    Unlock,
}

impl Advance {
    pub fn apply(self, record: UserAchievement, target: i64, now: DateTime<Utc>) -> ProgressUpdate {
        match self {
            Advance::By(delta) => update_progress(record, target, delta, now),
            Advance::Reach(value) => {
                let delta = value.saturating_sub(record.progress);
                update_progress(record, target, delta, now)
            }
            Advance::Unlock => unlock_now(record, target, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn fresh() -> UserAchievement {
        UserAchievement::empty(7, "active_participant")
    }

    #[test]
    fn accumulates_until_target() {
        let now = Utc::now();
        let mut record = fresh();
        for expected in 1..5 {
            let update = update_progress(record, 5, 1, now);
            assert_eq!(update.record.progress, expected);
            assert!(!update.newly_unlocked);
            record = update.record;
        }

        let update = update_progress(record, 5, 1, now);
        assert!(update.newly_unlocked);
        assert!(update.record.unlocked);
        assert_eq!(update.record.unlocked_at, Some(now));
    }

    #[test]
    fn caps_progress_at_target() {
        let update = update_progress(fresh(), 5, 40, Utc::now());
        assert_eq!(update.record.progress, 5);
        assert!(update.newly_unlocked);
    }

    #[test]
    fn negative_delta_never_decreases_progress() {
        let record = UserAchievement {
            progress: 3,
            ..fresh()
        };
        let update = update_progress(record, 5, -2, Utc::now());
        assert_eq!(update.record.progress, 3);
        assert!(!update.newly_unlocked);
    }

    #[test]
    fn unlocked_record_is_returned_as_is() {
        let unlocked_at = Utc::now();
        let record = UserAchievement {
            progress: 5,
            unlocked: true,
            unlocked_at: Some(unlocked_at),
            ..fresh()
        };

        let update = update_progress(record.clone(), 5, 1, Utc::now());
        assert_eq!(update.record, record);
        assert!(!update.newly_unlocked);

        let again = unlock_now(record.clone(), 5, Utc::now());
        assert_eq!(again.record, record);
        assert!(!again.newly_unlocked);
    }

    #[test]
    fn unlock_now_fills_progress() {
        let update = unlock_now(fresh(), 5, Utc::now());
        assert_eq!(update.record.progress, 5);
        assert!(update.newly_unlocked);
    }

    #[test]
    fn reaching_a_level_counts_the_difference() {
        let now = Utc::now();
        let record = UserAchievement {
            progress: 2,
            ..UserAchievement::empty(7, "expert")
        };

        let update = Advance::Reach(4).apply(record.clone(), 5, now);
        assert_eq!(update.record.progress, 4);
        assert!(!update.newly_unlocked);

        let update = Advance::Reach(6).apply(update.record, 5, now);
        assert_eq!(update.record.progress, 5);
        assert!(update.newly_unlocked);

        // a lower reading does nothing
        let update = Advance::Reach(1).apply(record.clone(), 5, now);
        assert_eq!(update.record, record);
    }

    #[test]
    fn catalog_ids_are_unique_and_targets_positive() {
        let ids: HashSet<_> = CATALOG.iter().map(|def| def.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert!(CATALOG.iter().all(|def| def.target > 0 && def.exp_reward > 0));
    }
}
