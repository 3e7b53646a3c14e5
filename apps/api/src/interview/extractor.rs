//! Field extraction: turns a free-text candidate reply into a partial state update.
//!
//! Matching is deliberately simple: case-insensitive substring checks on the
//! trimmed, lowercased reply plus a handful of regexes. Numeric rules always
//! take the first match in the reply.
//!
//! `AppState` holds an `Arc<dyn FieldExtractor>` so a smarter NLU backend can
//! replace `KeywordExtractor` without touching the transition engine.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::InterviewConfig;
use crate::interview::models::{InterviewState, Stage, StateUpdate};

pub const REASON_NOT_INTERESTED: &str = "Candidate not interested in discussing the role";
pub const REASON_SALARY_BEYOND_BUDGET: &str = "Salary expectations beyond budget";
pub const REASON_NO_LICENSE_PLANS: &str = "No plans to obtain required license";

const INTEREST_KEYWORDS: &[&str] = &["yes", "sure", "okay", "interested"];
const DISINTEREST_KEYWORDS: &[&str] = &["no", "not interested"];
const ACCEPT_KEYWORDS: &[&str] = &["yes", "okay", "accept", "fine"];
const REJECT_KEYWORDS: &[&str] = &["no", "can't", "won't"];
pub(crate) const YES_KEYWORDS: &[&str] = &["yes", "yeah", "yep", "sure", "correct"];
pub(crate) const NO_KEYWORDS: &[&str] = &["no", "nope", "don't", "haven't", "not yet"];
const NAME_FALSE_POSITIVES: &[&str] = &["nurse", "position", "applying"];
const TIMELINE_KEYWORDS: &[&str] = &["month", "week", "soon"];
const NO_PLAN_KEYWORDS: &[&str] = &["no", "not planning"];
const NEW_GRAD_KEYWORDS: &[&str] = &["new grad"];
const CLINICAL_KEYWORDS: &[&str] = &["acute", "hospital"];

static NAME_INTRO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:my name is|i'm|i am|call me)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*)?)")
        .expect("valid name regex")
});
static BARE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z .'\-]*$").expect("valid bare name regex"));
static SALARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?(\d+(?:,\d{3})*)(?:\.(\d{1,2}))?").expect("valid salary regex"));
static LICENSE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[A-Z0-9]{6,}\b").expect("valid license regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").expect("valid date regex"));
static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid year regex"));
static MONTHS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*month").expect("valid months regex"));
static YEARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*year").expect("valid years regex"));

/// Minimum reply length that moves `license_details` on to `experience`.
const LICENSE_DETAILS_MIN_CHARS: usize = 10;

/// Pluggable extraction strategy. Implementations must be pure: no I/O, no side effects.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, text: &str, state: &InterviewState) -> StateUpdate;
}

/// Keyword and regex heuristics, one rule set per stage.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    config: InterviewConfig,
}

impl KeywordExtractor {
    pub fn new(config: InterviewConfig) -> Self {
        Self { config }
    }

    fn greeting(&self, text: &str, lower: &str) -> StateUpdate {
        // Negative check first: "not interested" contains "interested".
        if contains_any(lower, DISINTEREST_KEYWORDS) {
            return StateUpdate::terminate(REASON_NOT_INTERESTED);
        }
        if contains_any(lower, INTEREST_KEYWORDS) {
            return StateUpdate::advance(Stage::BasicInfo);
        }
        match extract_name(text) {
            // Name already given, skip asking for it.
            Some(name) => StateUpdate {
                candidate_name: Some(name),
                stage: Some(Stage::SalaryDiscussion),
                ..StateUpdate::default()
            },
            None => StateUpdate::default(),
        }
    }

    fn basic_info(&self, text: &str) -> StateUpdate {
        match extract_name(text) {
            Some(name) => StateUpdate {
                candidate_name: Some(name),
                stage: Some(Stage::SalaryDiscussion),
                ..StateUpdate::default()
            },
            None => StateUpdate::default(),
        }
    }

    fn salary_discussion(&self, text: &str) -> StateUpdate {
        let Some(salary) = extract_salary(text) else {
            return StateUpdate::default();
        };
        if salary <= self.config.salary_floor || salary >= self.config.salary_ceiling {
            debug!("Salary {salary} outside sanity band, ignoring");
            return StateUpdate::default();
        }

        if salary <= self.config.max_salary {
            StateUpdate {
                desired_salary: Some(salary),
                salary_acceptable: Some(true),
                stage: Some(Stage::LicenseCheck),
                ..StateUpdate::default()
            }
        } else {
            StateUpdate {
                desired_salary: Some(salary),
                stage: Some(Stage::SalaryNegotiation),
                ..StateUpdate::default()
            }
        }
    }

    fn salary_negotiation(&self, lower: &str) -> StateUpdate {
        // "can't accept" must read as a refusal.
        if contains_any(lower, REJECT_KEYWORDS) {
            return StateUpdate {
                salary_acceptable: Some(false),
                ..StateUpdate::terminate(REASON_SALARY_BEYOND_BUDGET)
            };
        }
        if contains_any(lower, ACCEPT_KEYWORDS) {
            return StateUpdate {
                salary_acceptable: Some(true),
                stage: Some(Stage::LicenseCheck),
                ..StateUpdate::default()
            };
        }
        StateUpdate::default()
    }

    fn license_check(&self, lower: &str) -> StateUpdate {
        if contains_any(lower, YES_KEYWORDS) {
            StateUpdate {
                has_license: Some(true),
                stage: Some(Stage::LicenseDetails),
                ..StateUpdate::default()
            }
        } else if contains_any(lower, NO_KEYWORDS) {
            StateUpdate {
                has_license: Some(false),
                stage: Some(Stage::LicenseTimeline),
                ..StateUpdate::default()
            }
        } else {
            StateUpdate::default()
        }
    }

    fn license_details(&self, text: &str, lower: &str) -> StateUpdate {
        let mut update = StateUpdate {
            license_number: extract_license_number(text),
            license_expiry: extract_expiry(text, lower),
            ..StateUpdate::default()
        };
        if text.chars().count() > LICENSE_DETAILS_MIN_CHARS {
            update.stage = Some(Stage::Experience);
        }
        update
    }

    fn license_timeline(&self, lower: &str) -> StateUpdate {
        if contains_any(lower, TIMELINE_KEYWORDS) {
            let months = first_number(&MONTHS_RE, lower);
            if months.is_some_and(|m| m > self.config.license_timeline_max_months) {
                return StateUpdate::terminate(format!(
                    "License timeline too long (>{} months)",
                    self.config.license_timeline_max_months
                ));
            }
            return StateUpdate::advance(Stage::Experience);
        }
        if contains_any(lower, NO_PLAN_KEYWORDS) {
            return StateUpdate::terminate(REASON_NO_LICENSE_PLANS);
        }
        StateUpdate::default()
    }

    fn experience(&self, lower: &str) -> StateUpdate {
        let years = first_number(&YEARS_RE, lower);
        if contains_any(lower, YES_KEYWORDS) || years.is_some_and(|y| y > 0) {
            return StateUpdate {
                has_experience: Some(true),
                experience_years: years,
                stage: Some(Stage::ExperienceDetails),
                ..StateUpdate::default()
            };
        }
        if contains_any(lower, NO_KEYWORDS) || contains_any(lower, NEW_GRAD_KEYWORDS) {
            return StateUpdate {
                has_experience: Some(false),
                stage: Some(Stage::AlternativeExperience),
                ..StateUpdate::default()
            };
        }
        StateUpdate::default()
    }

    fn experience_details(&self, text: &str) -> StateUpdate {
        let len = text.chars().count();
        if len > 0 && len > self.config.experience_details_min_chars {
            StateUpdate::complete()
        } else {
            StateUpdate::default()
        }
    }

    fn alternative_experience(&self, lower: &str) -> StateUpdate {
        if contains_any(lower, YES_KEYWORDS) || contains_any(lower, CLINICAL_KEYWORDS) {
            StateUpdate::advance(Stage::ExperienceDetails)
        } else {
            StateUpdate::complete()
        }
    }
}

impl FieldExtractor for KeywordExtractor {
    fn extract(&self, text: &str, state: &InterviewState) -> StateUpdate {
        if state.completed {
            return StateUpdate::default();
        }

        let text = text.trim();
        if text.is_empty() {
            return StateUpdate::default();
        }
        let lower = text.to_lowercase();

        let update = match state.stage {
            Stage::Greeting => self.greeting(text, &lower),
            Stage::BasicInfo => self.basic_info(text),
            Stage::SalaryDiscussion => self.salary_discussion(text),
            Stage::SalaryNegotiation => self.salary_negotiation(&lower),
            Stage::LicenseCheck => self.license_check(&lower),
            Stage::LicenseDetails => self.license_details(text, &lower),
            Stage::LicenseTimeline => self.license_timeline(&lower),
            Stage::Experience => self.experience(&lower),
            Stage::ExperienceDetails => self.experience_details(text),
            Stage::AlternativeExperience => self.alternative_experience(&lower),
        };

        debug!(stage = %state.stage, ?update, "Extracted fields");
        update
    }
}

pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_false_positive_name(candidate: &str) -> bool {
    contains_any(&candidate.to_lowercase(), NAME_FALSE_POSITIVES)
}

/// "My name is Jane Doe" / "I'm Jane" / a bare 2–30 character line.
fn extract_name(text: &str) -> Option<String> {
    if let Some(caps) = NAME_INTRO_RE.captures(text) {
        let name = caps.get(1)?.as_str().trim();
        if !is_false_positive_name(name) {
            return Some(name.to_string());
        }
        return None;
    }

    let len = text.chars().count();
    if (2..=30).contains(&len) && BARE_NAME_RE.is_match(text) && !is_false_positive_name(text) {
        return Some(text.to_string());
    }
    None
}

fn extract_salary(text: &str) -> Option<f64> {
    let caps = SALARY_RE.captures(text)?;
    let whole: String = caps.get(1)?.as_str().chars().filter(|c| *c != ',').collect();
    match caps.get(2) {
        Some(cents) => format!("{whole}.{}", cents.as_str()).parse().ok(),
        None => whole.parse().ok(),
    }
}

/// First 6+ character alphanumeric token that contains a digit, uppercased.
fn extract_license_number(text: &str) -> Option<String> {
    LICENSE_NUMBER_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|token| token.chars().any(|c| c.is_ascii_digit()))
        .map(|token| token.to_uppercase())
}

fn extract_expiry(text: &str, lower: &str) -> Option<String> {
    if let Some(date) = DATE_RE.find(text) {
        return Some(date.as_str().to_string());
    }
    if let Some(year) = YEAR_RE.find(text) {
        return Some(year.as_str().to_string());
    }
    ["next year", "this year"]
        .into_iter()
        .find(|phrase| lower.contains(phrase))
        .map(str::to_string)
}

fn first_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> KeywordExtractor {
        KeywordExtractor::new(InterviewConfig::default())
    }

    fn at(stage: Stage) -> InterviewState {
        InterviewState {
            stage,
            ..InterviewState::new()
        }
    }

    #[test]
    fn test_greeting_yes_advances_to_basic_info() {
        let update = extractor().extract("Yes, sounds good", &at(Stage::Greeting));
        assert_eq!(update, StateUpdate::advance(Stage::BasicInfo));
    }

    #[test]
    fn test_greeting_no_terminates_as_not_interested() {
        for reply in ["no", "No thanks", "I'm not interested", "nope, no time"] {
            let update = extractor().extract(reply, &at(Stage::Greeting));
            assert_eq!(update.completed, Some(true), "reply: {reply}");
            assert_eq!(update.ended_early, Some(true), "reply: {reply}");
            assert_eq!(update.end_reason.as_deref(), Some(REASON_NOT_INTERESTED));
        }
    }

    #[test]
    fn test_greeting_name_introduction_skips_name_question() {
        let update = extractor().extract("Hi, my name is Maria Lopez", &at(Stage::Greeting));
        assert_eq!(update.candidate_name.as_deref(), Some("Maria Lopez"));
        assert_eq!(update.stage, Some(Stage::SalaryDiscussion));
    }

    #[test]
    fn test_greeting_rejects_job_title_as_name() {
        let update = extractor().extract("I'm applying for the nurse job", &at(Stage::Greeting));
        assert!(update.candidate_name.is_none());
    }

    #[test]
    fn test_basic_info_bare_name() {
        let update = extractor().extract("  Jane Doe ", &at(Stage::BasicInfo));
        assert_eq!(update.candidate_name.as_deref(), Some("Jane Doe"));
        assert_eq!(update.stage, Some(Stage::SalaryDiscussion));
    }

    #[test]
    fn test_basic_info_ignores_numbers_and_long_text() {
        assert!(extractor().extract("60000", &at(Stage::BasicInfo)).is_empty());
        let long = "this is a very long reply that is clearly not a name at all";
        assert!(extractor().extract(long, &at(Stage::BasicInfo)).is_empty());
    }

    #[test]
    fn test_salary_over_budget_goes_to_negotiation() {
        let update = extractor().extract("I'd like $85,000", &at(Stage::SalaryDiscussion));
        assert_eq!(update.desired_salary, Some(85_000.0));
        assert_eq!(update.stage, Some(Stage::SalaryNegotiation));
        assert!(update.salary_acceptable.is_none());
    }

    #[test]
    fn test_salary_within_budget_goes_to_license_check() {
        let update = extractor().extract("60000", &at(Stage::SalaryDiscussion));
        assert_eq!(update.desired_salary, Some(60_000.0));
        assert_eq!(update.salary_acceptable, Some(true));
        assert_eq!(update.stage, Some(Stage::LicenseCheck));
    }

    #[test]
    fn test_salary_exactly_at_max_is_acceptable() {
        let update = extractor().extract("$72,000", &at(Stage::SalaryDiscussion));
        assert_eq!(update.salary_acceptable, Some(true));
        assert_eq!(update.stage, Some(Stage::LicenseCheck));
    }

    #[test]
    fn test_salary_outside_sanity_band_is_ignored() {
        for reply in ["5", "999999", "20000", "200000", "no idea"] {
            let update = extractor().extract(reply, &at(Stage::SalaryDiscussion));
            assert!(update.is_empty(), "reply: {reply}");
        }
    }

    #[test]
    fn test_salary_takes_first_number() {
        let update = extractor().extract("65000 or maybe 90000", &at(Stage::SalaryDiscussion));
        assert_eq!(update.desired_salary, Some(65_000.0));
    }

    #[test]
    fn test_salary_with_cents() {
        let update = extractor().extract("$55,000.50 please", &at(Stage::SalaryDiscussion));
        assert_eq!(update.desired_salary, Some(55_000.5));
    }

    #[test]
    fn test_negotiation_accept_and_reject() {
        let accepted = extractor().extract("Okay, that works", &at(Stage::SalaryNegotiation));
        assert_eq!(accepted.salary_acceptable, Some(true));
        assert_eq!(accepted.stage, Some(Stage::LicenseCheck));

        let rejected = extractor().extract("I can't accept that", &at(Stage::SalaryNegotiation));
        assert_eq!(rejected.salary_acceptable, Some(false));
        assert_eq!(rejected.ended_early, Some(true));
        assert_eq!(rejected.end_reason.as_deref(), Some(REASON_SALARY_BEYOND_BUDGET));
    }

    #[test]
    fn test_license_check_branches() {
        let yes = extractor().extract("Yes I do", &at(Stage::LicenseCheck));
        assert_eq!(yes.has_license, Some(true));
        assert_eq!(yes.stage, Some(Stage::LicenseDetails));

        let no = extractor().extract("Not yet", &at(Stage::LicenseCheck));
        assert_eq!(no.has_license, Some(false));
        assert_eq!(no.stage, Some(Stage::LicenseTimeline));
    }

    #[test]
    fn test_license_details_number_and_year() {
        let update = extractor().extract("ABC1234, 2026", &at(Stage::LicenseDetails));
        assert_eq!(update.license_number.as_deref(), Some("ABC1234"));
        assert_eq!(update.license_expiry.as_deref(), Some("2026"));
        assert_eq!(update.stage, Some(Stage::Experience));
    }

    #[test]
    fn test_license_details_full_date_and_lowercase_number() {
        let update = extractor().extract(
            "my license is rn556677 and expires 03/15/2027",
            &at(Stage::LicenseDetails),
        );
        assert_eq!(update.license_number.as_deref(), Some("RN556677"));
        assert_eq!(update.license_expiry.as_deref(), Some("03/15/2027"));
    }

    #[test]
    fn test_license_details_short_reply_does_not_advance() {
        let update = extractor().extract("RN12345", &at(Stage::LicenseDetails));
        assert_eq!(update.license_number.as_deref(), Some("RN12345"));
        assert!(update.stage.is_none());
    }

    #[test]
    fn test_license_timeline_too_long_terminates() {
        let update = extractor().extract("about 8 months", &at(Stage::LicenseTimeline));
        assert_eq!(update.completed, Some(true));
        assert!(update.end_reason.unwrap().contains("too long"));
    }

    #[test]
    fn test_license_timeline_short_advances() {
        let update = extractor().extract("2 months", &at(Stage::LicenseTimeline));
        assert_eq!(update, StateUpdate::advance(Stage::Experience));
        let soon = extractor().extract("very soon, in a few weeks", &at(Stage::LicenseTimeline));
        assert_eq!(soon.stage, Some(Stage::Experience));
    }

    #[test]
    fn test_license_timeline_no_plans_terminates() {
        let update = extractor().extract("I'm not planning to", &at(Stage::LicenseTimeline));
        assert_eq!(update.end_reason.as_deref(), Some(REASON_NO_LICENSE_PLANS));
    }

    #[test]
    fn test_experience_yes_with_years() {
        let update = extractor().extract("yes, 3 years", &at(Stage::Experience));
        assert_eq!(update.has_experience, Some(true));
        assert_eq!(update.experience_years, Some(3));
        assert_eq!(update.stage, Some(Stage::ExperienceDetails));
    }

    #[test]
    fn test_experience_new_grad_goes_to_alternative() {
        let update = extractor().extract("I'm a new grad", &at(Stage::Experience));
        assert_eq!(update.has_experience, Some(false));
        assert_eq!(update.stage, Some(Stage::AlternativeExperience));
    }

    #[test]
    fn test_experience_details_needs_more_than_threshold() {
        let thirty = "Two years ICU at Mercy General";
        assert_eq!(thirty.chars().count(), 30);
        assert_eq!(
            extractor().extract(thirty, &at(Stage::ExperienceDetails)),
            StateUpdate::default()
        );

        let thirty_one = "Two years ICU at Mercy General.";
        assert_eq!(thirty_one.chars().count(), 31);
        assert_eq!(
            extractor().extract(thirty_one, &at(Stage::ExperienceDetails)),
            StateUpdate::complete()
        );
    }

    #[test]
    fn test_experience_details_uses_configured_threshold() {
        let short = extractor().extract("ICU", &at(Stage::ExperienceDetails));
        assert!(short.is_empty());
        let long = extractor().extract(
            "Two years on a med-surg floor at County General",
            &at(Stage::ExperienceDetails),
        );
        assert_eq!(long, StateUpdate::complete());

        let lenient = KeywordExtractor::new(InterviewConfig {
            experience_details_min_chars: 0,
            ..InterviewConfig::default()
        });
        assert_eq!(
            lenient.extract("ICU", &at(Stage::ExperienceDetails)),
            StateUpdate::complete()
        );
    }

    #[test]
    fn test_alternative_experience_branches() {
        let clinical = extractor().extract("I did acute care rotations", &at(Stage::AlternativeExperience));
        assert_eq!(clinical, StateUpdate::advance(Stage::ExperienceDetails));
        let none = extractor().extract("nothing like that", &at(Stage::AlternativeExperience));
        assert_eq!(none, StateUpdate::complete());
    }

    #[test]
    fn test_completed_state_yields_no_update() {
        let state = InterviewState {
            completed: true,
            ..at(Stage::Greeting)
        };
        assert!(extractor().extract("yes", &state).is_empty());
    }

    #[test]
    fn test_unrecognized_input_yields_no_update() {
        assert!(extractor().extract("hmm", &at(Stage::LicenseCheck)).is_empty());
        assert!(extractor().extract("   ", &at(Stage::Greeting)).is_empty());
    }
}
