//! Step processing for a validated template.
//!
//! Conditions are evaluated in declaration order; the first match wins and its
//! outcome is looked up in `nextSteps`. When nothing matches, the `default`
//! outcome is used. Numeric conditions fail closed on non-numeric input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::interview::extractor::{contains_any, NO_KEYWORDS, YES_KEYWORDS};
use crate::template::models::{
    Comparison, CustomCheck, Matcher, Step, StepKind, DEFAULT_OUTCOME, EXIT_TARGET, RETRY_OUTCOME,
};

static LEADING_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("valid number regex")
});

const NUMBER_REQUIRED_MESSAGE: &str = "Response must be a number";
const DEFAULT_RETRY_MESSAGE: &str = "Sorry, I didn't catch that. Could you answer again?";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResult {
    /// Move on to the step with this id.
    Advance { next_step: String },
    /// The walk is over.
    Exit,
    /// The response could not be routed; ask again.
    Invalid { message: String },
}

/// Leading-number parse: `"65000 per year"` → 65000, `"abc"` → `None`.
pub fn parse_leading_number(response: &str) -> Option<f64> {
    LEADING_NUMBER_RE
        .find(response.trim_start())
        .and_then(|m| m.as_str().parse().ok())
}

fn matches(matcher: &Matcher, response: &str) -> bool {
    match matcher {
        Matcher::Regex(re) => re.is_match(response),
        Matcher::Numeric { op, threshold } => {
            let Some(n) = parse_leading_number(response) else {
                return false;
            };
            match op {
                Comparison::Lt => n < *threshold,
                Comparison::Le => n <= *threshold,
                Comparison::Gt => n > *threshold,
                Comparison::Ge => n >= *threshold,
                Comparison::Eq => (n - threshold).abs() < f64::EPSILON,
            }
        }
        Matcher::Custom(check) => {
            let lower = response.to_lowercase();
            match check {
                CustomCheck::Yes => contains_any(&lower, YES_KEYWORDS),
                CustomCheck::No => contains_any(&lower, NO_KEYWORDS),
                CustomCheck::NonEmpty => !lower.trim().is_empty(),
                CustomCheck::Contains(word) => lower.contains(word.as_str()),
            }
        }
    }
}

/// Returns the id of the next step (or `"exit"`) for `response`, or `None`
/// when a `retry` condition matches or no condition matches and there is no
/// `default` outcome.
pub fn evaluate_conditions(step: &Step, response: &str) -> Option<String> {
    let matched = step
        .conditions
        .iter()
        .find(|c| matches(&c.matcher, response))
        .map(|c| c.outcome.as_str());
    if matched == Some(RETRY_OUTCOME) {
        return None;
    }
    let outcome = matched.unwrap_or(DEFAULT_OUTCOME);

    step.next_steps
        .get(outcome)
        .or_else(|| step.next_steps.get(DEFAULT_OUTCOME))
        .cloned()
}

pub fn process_response(step: &Step, response: &str) -> StepResult {
    if step.kind == StepKind::Exit {
        return StepResult::Exit;
    }

    if step.kind == StepKind::Validation
        && step.has_numeric_condition()
        && parse_leading_number(response).is_none()
    {
        return StepResult::Invalid {
            message: NUMBER_REQUIRED_MESSAGE.to_string(),
        };
    }

    match evaluate_conditions(step, response) {
        Some(target) if target == EXIT_TARGET => StepResult::Exit,
        Some(next_step) => StepResult::Advance { next_step },
        None => StepResult::Invalid {
            message: step
                .retry_message()
                .unwrap_or(DEFAULT_RETRY_MESSAGE)
                .to_string(),
        },
    }
}
