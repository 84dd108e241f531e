//! # Leveling
//!
//! Experience to level mapping. Quadratic curve: reaching level `L` (for `L >= 2`)
//! takes `100 * L²` total experience, level 1 is free.
//!
//! | Level | Total XP |
//! |-------|----------|
//! | 1     | 0        |
//! | 2     | 400      |
//! | 3     | 900      |
//! | 4     | 1600     |
use serde::Serialize;

use crate::error::AppError;

pub const BASE_LEVEL: i64 = 1;

/// Cumulative experience needed to hold `level`.
pub fn threshold(level: i64) -> i64 {
    if level <= BASE_LEVEL {
        return 0;
    }

    100i64.saturating_mul(level).saturating_mul(level)
}

/// Largest level whose threshold fits `experience`.
///
/// `100 * L² <= xp` holds exactly when `L² <= xp / 100`, so this is an integer root.
pub fn level_for(experience: i64) -> i64 {
    (experience.max(0) / 100).isqrt().max(BASE_LEVEL)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub old_level: i64,
    pub new_level: i64,
    pub experience: i64,
    pub gained: i64,
    pub leveled_up: bool,
}

/// Pure; the caller persists the result.
pub fn add_experience(
    current_level: i64,
    current_experience: i64,
    delta: i64,
) -> Result<Progression, AppError> {
    if delta <= 0 {
        return Err(AppError::invalid("experience delta must be positive"));
    }

    let experience = current_experience
        .checked_add(delta)
        .ok_or_else(|| AppError::invalid("experience overflow"))?;

    let level = current_level.max(level_for(experience));

    Ok(Progression {
        old_level: current_level,
        new_level: level,
        experience,
        gained: delta,
        leveled_up: level > current_level,
    })
}
