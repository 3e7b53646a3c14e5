use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position in the scripted screening conversation.
///
/// Serialized as snake_case ids (`"salary_discussion"`). Unknown ids are
/// rejected at deserialization, so a corrupt state blob never reaches the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Greeting,
    BasicInfo,
    SalaryDiscussion,
    SalaryNegotiation,
    LicenseCheck,
    LicenseDetails,
    LicenseTimeline,
    Experience,
    ExperienceDetails,
    AlternativeExperience,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Greeting,
        Stage::BasicInfo,
        Stage::SalaryDiscussion,
        Stage::SalaryNegotiation,
        Stage::LicenseCheck,
        Stage::LicenseDetails,
        Stage::LicenseTimeline,
        Stage::Experience,
        Stage::ExperienceDetails,
        Stage::AlternativeExperience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::BasicInfo => "basic_info",
            Stage::SalaryDiscussion => "salary_discussion",
            Stage::SalaryNegotiation => "salary_negotiation",
            Stage::LicenseCheck => "license_check",
            Stage::LicenseDetails => "license_details",
            Stage::LicenseTimeline => "license_timeline",
            Stage::Experience => "experience",
            Stage::ExperienceDetails => "experience_details",
            Stage::AlternativeExperience => "alternative_experience",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Structured facts collected from the candidate plus the conversation position.
///
/// `completed` is terminal: once set, the engine refuses further transitions.
/// `ended_early` is only ever set together with `completed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewState {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_salary: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary_acceptable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_license: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_experience: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<u32>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_early: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl InterviewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ended_early(&self) -> bool {
        self.ended_early.unwrap_or(false)
    }
}

/// Partial update proposed by a field extractor. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub stage: Option<Stage>,
    pub candidate_name: Option<String>,
    pub desired_salary: Option<f64>,
    pub salary_acceptable: Option<bool>,
    pub has_license: Option<bool>,
    pub license_number: Option<String>,
    pub license_expiry: Option<String>,
    pub has_experience: Option<bool>,
    pub experience_years: Option<u32>,
    pub completed: Option<bool>,
    pub ended_early: Option<bool>,
    pub end_reason: Option<String>,
}

impl StateUpdate {
    pub fn advance(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    /// Early termination: the candidate disqualified themself.
    pub fn terminate(reason: impl Into<String>) -> Self {
        Self {
            completed: Some(true),
            ended_early: Some(true),
            end_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Normal completion at the end of the script.
    pub fn complete() -> Self {
        Self {
            completed: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A single transcript entry. Append-only: never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One interview: its state plus the ordered transcript.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub template_id: Option<String>,
    pub state: InterviewState,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serde_uses_snake_case_ids() {
        let json = serde_json::to_string(&Stage::SalaryNegotiation).unwrap();
        assert_eq!(json, r#""salary_negotiation""#);
        let stage: Stage = serde_json::from_str(r#""alternative_experience""#).unwrap();
        assert_eq!(stage, Stage::AlternativeExperience);
    }

    #[test]
    fn test_unknown_stage_is_rejected_not_panicking() {
        assert!(serde_json::from_str::<Stage>(r#""onboarding""#).is_err());
        assert!("onboarding".parse::<Stage>().is_err());
        let state = serde_json::from_str::<InterviewState>(r#"{"stage":"bogus","completed":false}"#);
        assert!(state.is_err());
    }

    #[test]
    fn test_stage_from_str_matches_as_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_state_uses_camel_case_fields() {
        let state = InterviewState {
            candidate_name: Some("Jane Doe".to_string()),
            desired_salary: Some(65000.0),
            ..InterviewState::new()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["candidateName"], "Jane Doe");
        assert_eq!(value["desiredSalary"], 65000.0);
        assert_eq!(value["stage"], "greeting");
        assert!(value.get("licenseNumber").is_none());
    }

    #[test]
    fn test_terminate_update_sets_completed_and_ended_early() {
        let update = StateUpdate::terminate("nope");
        assert_eq!(update.completed, Some(true));
        assert_eq!(update.ended_early, Some(true));
        assert_eq!(update.end_reason.as_deref(), Some("nope"));
        assert!(!update.is_empty());
        assert!(StateUpdate::default().is_empty());
    }
}
