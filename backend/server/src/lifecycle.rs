//! # Request Lifecycle
//!
//! ```text
//!            take              complete
//!   new ─────────────> in_progress ─────────> completed
//!    │                     │
//!    │ cancel              │ cancel
//!    └──────> cancelled <──┘
//! ```
//!
//! | From        | To          | Who                                   | Guard                 |
//! |-------------|-------------|---------------------------------------|-----------------------|
//! | new         | in_progress | volunteer or admin                    | unassigned            |
//! | in_progress | completed   | requester, assigned volunteer, admin  | has a volunteer       |
//! | in_progress | cancelled   | requester, assigned volunteer, admin  |                       |
//! | new         | cancelled   | requester or admin                    |                       |
//!
//! Nothing ever leads back to `new`. Guards here only look at in-memory copies;
//! the database repeats the status check in its conditional update so racing
//! writers still lose with a conflict.
use chrono::{DateTime, Utc};

use crate::{
    auth::Principal,
    error::AppError,
    models::{HelpRequest, RequestStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Take,
    Complete,
    Cancel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Take => "take",
            Action::Complete => "complete",
            Action::Cancel => "cancel",
        }
    }
}

pub fn is_edge(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;

    matches!(
        (from, to),
        (New, InProgress) | (InProgress, Completed) | (InProgress, Cancelled) | (New, Cancelled)
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub from: RequestStatus,
    pub before: HelpRequest,
    pub after: HelpRequest,
}

fn is_requester(request: &HelpRequest, actor: &Principal) -> bool {
    request.requester_id == actor.user_id
}

fn is_assignee(request: &HelpRequest, actor: &Principal) -> bool {
    request.assigned_to == Some(actor.user_id)
}

fn target(request: &HelpRequest, action: Action) -> Result<RequestStatus, AppError> {
    let to = match action {
        Action::Take => RequestStatus::InProgress,
        Action::Complete => RequestStatus::Completed,
        Action::Cancel => RequestStatus::Cancelled,
    };

    if !is_edge(request.status, to) {
        return Err(AppError::conflict(format!(
            "cannot {} a request that is {}",
            action.as_str(),
            request.status
        )));
    }

    Ok(to)
}

/// Checks who may move `request` along `action` and returns both copies.
pub fn transition(
    request: &HelpRequest,
    action: Action,
    actor: &Principal,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    let to = target(request, action)?;
    let admin = actor.role.is_admin();

    let mut after = request.clone();
    after.status = to;
    after.updated_at = now;

    match action {
        Action::Take => {
            if !actor.role.can_volunteer() {
                return Err(AppError::Forbidden);
            }
            if request.assigned_to.is_some() {
                return Err(AppError::conflict("request is already assigned"));
            }
            after.assigned_to = Some(actor.user_id);
        }
        Action::Complete => {
            if !(admin || is_requester(request, actor) || is_assignee(request, actor)) {
                return Err(AppError::Forbidden);
            }
            if request.assigned_to.is_none() {
                return Err(AppError::conflict("request has no assigned volunteer"));
            }
            after.completed_at = Some(now);
        }
        Action::Cancel => {
            let allowed = match request.status {
                RequestStatus::New => admin || is_requester(request, actor),
                _ => admin || is_requester(request, actor) || is_assignee(request, actor),
            };
            if !allowed {
                return Err(AppError::Forbidden);
            }
            after.assigned_to = None;
        }
    }

    Ok(Transition {
        from: request.status,
        before: request.clone(),
        after,
    })
}

/// Title, description, priority and so on may change only before anyone picks it up.
pub fn check_edit(request: &HelpRequest, actor: &Principal) -> Result<(), AppError> {
    if !(actor.role.is_admin() || is_requester(request, actor)) {
        return Err(AppError::Forbidden);
    }
    if request.status != RequestStatus::New {
        return Err(AppError::conflict("only new requests can be edited"));
    }

    Ok(())
}

pub fn check_delete(request: &HelpRequest, actor: &Principal) -> Result<(), AppError> {
    if !(actor.role.is_admin() || is_requester(request, actor)) {
        return Err(AppError::Forbidden);
    }
    if request.status == RequestStatus::InProgress {
        return Err(AppError::conflict("cancel the request before deleting it"));
    }

    Ok(())
}

/// Returns the volunteer being rated.
pub fn check_rating(
    request: &HelpRequest,
    actor: &Principal,
    rating: i64,
    comment: &str,
) -> Result<i64, AppError> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::invalid("rating must be between 1 and 5"));
    }
    if comment.chars().count() > 500 {
        return Err(AppError::invalid("comment must be at most 500 characters"));
    }
    if !is_requester(request, actor) {
        return Err(AppError::Forbidden);
    }
    if request.status != RequestStatus::Completed {
        return Err(AppError::conflict("only completed requests can be rated"));
    }

    request
        .assigned_to
        .ok_or_else(|| AppError::conflict("request has no volunteer to rate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Role};

    const REQUESTER: i64 = 1;
    const VOLUNTEER: i64 = 2;
    const STRANGER: i64 = 3;

    fn actor(user_id: i64, role: Role) -> Principal {
        Principal { user_id, role }
    }

    fn request(status: RequestStatus, assigned_to: Option<i64>) -> HelpRequest {
        let now = Utc::now();
        HelpRequest {
            id: 10,
            title: "Groceries".to_string(),
            description: "Need help carrying groceries".to_string(),
            status,
            category_id: 1,
            priority: Priority::High,
            location: "Main st".to_string(),
            requester_id: REQUESTER,
            assigned_to,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn no_edge_leads_back_to_new() {
        use RequestStatus::*;
        for from in [New, InProgress, Completed, Cancelled] {
            assert!(!is_edge(from, New));
        }
        for from in [Completed, Cancelled] {
            for to in [New, InProgress, Completed, Cancelled] {
                assert!(!is_edge(from, to));
            }
        }
    }

    #[test]
    fn volunteer_takes_new_request() {
        let now = Utc::now();
        let t = transition(
            &request(RequestStatus::New, None),
            Action::Take,
            &actor(VOLUNTEER, Role::Volunteer),
            now,
        )
        .unwrap();

        assert_eq!(t.from, RequestStatus::New);
        assert_eq!(t.after.status, RequestStatus::InProgress);
        assert_eq!(t.after.assigned_to, Some(VOLUNTEER));
        assert_eq!(t.after.updated_at, now);
    }

    #[test]
    fn plain_user_cannot_take() {
        let result = transition(
            &request(RequestStatus::New, None),
            Action::Take,
            &actor(STRANGER, Role::User),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::Forbidden)));
    }

    #[test]
    fn taking_an_assigned_request_conflicts() {
        let result = transition(
            &request(RequestStatus::InProgress, Some(VOLUNTEER)),
            Action::Take,
            &actor(STRANGER, Role::Volunteer),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn completing_new_request_conflicts() {
        let result = transition(
            &request(RequestStatus::New, None),
            Action::Complete,
            &actor(REQUESTER, Role::User),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn requester_or_assignee_completes() {
        let now = Utc::now();
        for who in [actor(REQUESTER, Role::User), actor(VOLUNTEER, Role::Volunteer)] {
            let t = transition(
                &request(RequestStatus::InProgress, Some(VOLUNTEER)),
                Action::Complete,
                &who,
                now,
            )
            .unwrap();
            assert_eq!(t.after.status, RequestStatus::Completed);
            assert_eq!(t.after.completed_at, Some(now));
            assert_eq!(t.after.assigned_to, Some(VOLUNTEER));
        }
    }

    #[test]
    fn stranger_cannot_complete() {
        let result = transition(
            &request(RequestStatus::InProgress, Some(VOLUNTEER)),
            Action::Complete,
            &actor(STRANGER, Role::Volunteer),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::Forbidden)));
    }

    #[test]
    fn admin_completes_any_request() {
        let result = transition(
            &request(RequestStatus::InProgress, Some(VOLUNTEER)),
            Action::Complete,
            &actor(STRANGER, Role::Admin),
            Utc::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn in_progress_without_volunteer_cannot_complete() {
        let result = transition(
            &request(RequestStatus::InProgress, None),
            Action::Complete,
            &actor(REQUESTER, Role::User),
            Utc::now(),
        );
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn cancel_new_is_requester_only() {
        let new = request(RequestStatus::New, None);
        assert!(matches!(
            transition(&new, Action::Cancel, &actor(VOLUNTEER, Role::Volunteer), Utc::now()),
            Err(AppError::Forbidden)
        ));

        let t = transition(&new, Action::Cancel, &actor(REQUESTER, Role::User), Utc::now()).unwrap();
        assert_eq!(t.after.status, RequestStatus::Cancelled);
    }

    #[test]
    fn assignee_cancels_in_progress_and_assignment_clears() {
        let t = transition(
            &request(RequestStatus::InProgress, Some(VOLUNTEER)),
            Action::Cancel,
            &actor(VOLUNTEER, Role::Volunteer),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(t.after.status, RequestStatus::Cancelled);
        assert_eq!(t.after.assigned_to, None);
        assert_eq!(t.before.assigned_to, Some(VOLUNTEER));
    }

    #[test]
    fn terminal_states_reject_everything() {
        let everyone = actor(REQUESTER, Role::Admin);
        for status in [RequestStatus::Completed, RequestStatus::Cancelled] {
            for action in [Action::Take, Action::Complete, Action::Cancel] {
                let result =
                    transition(&request(status, Some(VOLUNTEER)), action, &everyone, Utc::now());
                assert!(matches!(result, Err(AppError::Conflict(_))));
            }
        }
    }

    #[test]
    fn rating_rules() {
        let mut completed = request(RequestStatus::Completed, Some(VOLUNTEER));
        completed.completed_at = Some(Utc::now());
        let requester = actor(REQUESTER, Role::User);

        assert_eq!(check_rating(&completed, &requester, 5, "").unwrap(), VOLUNTEER);
        assert!(matches!(
            check_rating(&completed, &requester, 6, ""),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            check_rating(&completed, &actor(VOLUNTEER, Role::Volunteer), 5, ""),
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            check_rating(&request(RequestStatus::InProgress, Some(VOLUNTEER)), &requester, 5, ""),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn edits_only_while_new() {
        let requester = actor(REQUESTER, Role::User);
        assert!(check_edit(&request(RequestStatus::New, None), &requester).is_ok());
        assert!(matches!(
            check_edit(&request(RequestStatus::InProgress, Some(VOLUNTEER)), &requester),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            check_edit(&request(RequestStatus::New, None), &actor(STRANGER, Role::Volunteer)),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn in_progress_requests_are_not_deleted() {
        let requester = actor(REQUESTER, Role::User);
        assert!(check_delete(&request(RequestStatus::Cancelled, None), &requester).is_ok());
        assert!(matches!(
            check_delete(&request(RequestStatus::InProgress, Some(VOLUNTEER)), &requester),
            Err(AppError::Conflict(_))
        ));
    }
}
