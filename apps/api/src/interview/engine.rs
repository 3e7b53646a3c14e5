//! Stage transition engine: merges extractor updates into the persisted state.
//!
//! The engine trusts the extractor's proposed stage; it only enforces the
//! terminal invariant and stamps completion.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::interview::models::{InterviewState, StateUpdate};

/// Shallow-merges `update` onto `current` (last write wins per field).
///
/// A completed state is frozen: it is returned unchanged whatever the update says.
pub fn apply(current: InterviewState, update: StateUpdate) -> InterviewState {
    apply_at(current, update, Utc::now())
}

pub fn apply_at(current: InterviewState, update: StateUpdate, now: DateTime<Utc>) -> InterviewState {
    if current.completed {
        return current;
    }

    let previous_stage = current.stage;
    let mut next = current;

    if update.is_empty() {
        debug!(stage = %next.stage, "Nothing extracted, state unchanged");
    } else {
        merge_update(&mut next, update);
    }

    // ended_early implies completed.
    if next.is_ended_early() {
        next.completed = true;
    }

    if next.completed {
        next.completed_at = Some(now);
        info!(
            stage = %next.stage,
            ended_early = next.is_ended_early(),
            reason = next.end_reason.as_deref().unwrap_or("-"),
            "Interview completed"
        );
    } else if next.stage != previous_stage {
        info!("Interview stage {previous_stage} -> {}", next.stage);
    }

    next
}

/// Repairs a state that did not come from this engine (client-supplied or
/// recovered from a marker) so the terminal invariant holds before use.
pub fn normalize(state: InterviewState) -> InterviewState {
    normalize_at(state, Utc::now())
}

pub fn normalize_at(mut state: InterviewState, now: DateTime<Utc>) -> InterviewState {
    if state.is_ended_early() && !state.completed {
        warn!(stage = %state.stage, "Recovered state ended early but was not completed, closing it");
        state.completed = true;
    }
    if state.completed && state.completed_at.is_none() {
        state.completed_at = Some(now);
    }
    state
}

fn merge_update(next: &mut InterviewState, update: StateUpdate) {
    let StateUpdate {
        stage,
        candidate_name,
        desired_salary,
        salary_acceptable,
        has_license,
        license_number,
        license_expiry,
        has_experience,
        experience_years,
        completed,
        ended_early,
        end_reason,
    } = update;

    merge(&mut next.stage, stage);
    merge_opt(&mut next.candidate_name, candidate_name);
    merge_opt(&mut next.desired_salary, desired_salary);
    merge_opt(&mut next.salary_acceptable, salary_acceptable);
    merge_opt(&mut next.has_license, has_license);
    merge_opt(&mut next.license_number, license_number);
    merge_opt(&mut next.license_expiry, license_expiry);
    merge_opt(&mut next.has_experience, has_experience);
    merge_opt(&mut next.experience_years, experience_years);
    merge(&mut next.completed, completed);
    merge_opt(&mut next.ended_early, ended_early);
    merge_opt(&mut next.end_reason, end_reason);
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::models::Stage;

    fn completed_state() -> InterviewState {
        InterviewState {
            stage: Stage::LicenseTimeline,
            completed: true,
            ended_early: Some(true),
            end_reason: Some("No plans to obtain required license".to_string()),
            ..InterviewState::new()
        }
    }

    #[test]
    fn test_completed_state_is_frozen() {
        let state = completed_state();
        let updates = [
            StateUpdate::advance(Stage::Experience),
            StateUpdate {
                completed: Some(false),
                ended_early: Some(false),
                ..StateUpdate::default()
            },
            StateUpdate {
                candidate_name: Some("Someone Else".to_string()),
                ..StateUpdate::default()
            },
            StateUpdate::default(),
        ];
        for update in updates {
            assert_eq!(apply(state.clone(), update), state);
        }
    }

    #[test]
    fn test_merge_is_last_write_wins_and_keeps_untouched_fields() {
        let state = InterviewState {
            stage: Stage::SalaryDiscussion,
            candidate_name: Some("Jane Doe".to_string()),
            ..InterviewState::new()
        };
        let next = apply(
            state,
            StateUpdate {
                desired_salary: Some(65_000.0),
                salary_acceptable: Some(true),
                stage: Some(Stage::LicenseCheck),
                ..StateUpdate::default()
            },
        );
        assert_eq!(next.stage, Stage::LicenseCheck);
        assert_eq!(next.candidate_name.as_deref(), Some("Jane Doe"));
        assert_eq!(next.desired_salary, Some(65_000.0));
        assert!(!next.completed);
        assert!(next.completed_at.is_none());
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let state = InterviewState {
            stage: Stage::Experience,
            ..InterviewState::new()
        };
        assert_eq!(apply(state.clone(), StateUpdate::default()), state);
    }

    #[test]
    fn test_termination_stamps_completion() {
        let now = Utc::now();
        let next = apply_at(
            InterviewState::new(),
            StateUpdate::terminate("Candidate not interested in discussing the role"),
            now,
        );
        assert!(next.completed);
        assert!(next.is_ended_early());
        assert_eq!(next.completed_at, Some(now));
        assert_eq!(next.stage, Stage::Greeting);
    }

    #[test]
    fn test_empty_update_still_closes_ended_early_state() {
        let now = Utc::now();
        let broken = InterviewState {
            ended_early: Some(true),
            end_reason: Some("Salary expectations beyond budget".to_string()),
            ..InterviewState::new()
        };
        let next = apply_at(broken, StateUpdate::default(), now);
        assert!(next.completed);
        assert_eq!(next.completed_at, Some(now));
    }

    #[test]
    fn test_normalize_closes_ended_early_state() {
        let now = Utc::now();
        let recovered = InterviewState {
            stage: Stage::SalaryNegotiation,
            ended_early: Some(true),
            ..InterviewState::new()
        };
        let fixed = normalize_at(recovered, now);
        assert!(fixed.completed);
        assert_eq!(fixed.completed_at, Some(now));
        assert_eq!(fixed.stage, Stage::SalaryNegotiation);

        let healthy = InterviewState::new();
        assert_eq!(normalize_at(healthy.clone(), now), healthy);
    }

    #[test]
    fn test_ended_early_forces_completed() {
        let next = apply(
            InterviewState::new(),
            StateUpdate {
                ended_early: Some(true),
                ..StateUpdate::default()
            },
        );
        assert!(next.completed);
    }
}
