//! Experience handed out by request activity.
use crate::models::Priority;

pub const CREATE_REQUEST: i64 = 10;
pub const ADD_COMMENT: i64 = 5;
pub const TAKE_REQUEST: i64 = 15;
pub const REQUESTER_COMPLETION: i64 = 20;

/// Volunteer's share for finishing a request.
pub fn completion(priority: Priority) -> i64 {
    match priority {
        Priority::High => 50,
        Priority::Medium => 30,
        Priority::Low => 20,
    }
}

/// Bonus for a good rating, nothing below four stars.
pub fn rating_bonus(rating: i64) -> Option<i64> {
    match rating {
        5 => Some(25),
        4 => Some(15),
        _ => None,
    }
}
