use serde_json::json;

use crate::config::InterviewConfig;
use crate::interview::prompts::format_currency;
use crate::template::models::TemplateDocument;
use crate::template::validator::TemplateError;

pub const NURSE_SCREENING_ID: &str = "nurse-screening";

/// The registered-nurse screening flow as a declarative step graph.
/// Thresholds follow the interview configuration.
pub fn nurse_screening(config: &InterviewConfig) -> Result<TemplateDocument, TemplateError> {
    let floor = config.salary_floor;
    let ceiling = config.salary_ceiling;
    let max = config.max_salary;
    let months = config.license_timeline_max_months;

    let value = json!({
        "id": NURSE_SCREENING_ID,
        "name": format!("{} screening", config.position_title),
        "version": "1.0",
        "description": "Interest, salary, license and experience pre-screen.",
        "steps": [
            {
                "id": "greeting",
                "type": "question",
                "content": format!("Hi! Are you interested in discussing the {} position?", config.position_title),
                "conditions": [
                    {"type": "regex", "value": r"\b(no|not interested)\b", "outcome": "declined", "caseInsensitive": true}
                ],
                "nextSteps": {"declined": "exit", "default": "name"}
            },
            {
                "id": "name",
                "type": "question",
                "content": "Great! What's your full name?",
                "conditions": [
                    {"type": "custom", "value": "non_empty", "outcome": "given"}
                ],
                "nextSteps": {"given": "salary"}
            },
            {
                "id": "salary",
                "type": "validation",
                "content": "What are your annual salary expectations? (numbers only)",
                "conditions": [
                    {"type": "numeric", "value": format!("<= {floor}"), "outcome": "retry"},
                    {"type": "numeric", "value": format!(">= {ceiling}"), "outcome": "retry"},
                    {"type": "numeric", "value": format!("<= {max}"), "outcome": "within_budget"},
                    {"type": "numeric", "value": format!("> {max}"), "outcome": "over_budget"}
                ],
                "nextSteps": {"within_budget": "license", "over_budget": "salary_negotiation"},
                "metadata": {"retry_message": "Please give your expected annual salary as a full yearly figure, for example 65000."}
            },
            {
                "id": "salary_negotiation",
                "type": "question",
                "content": format!("Our budget tops out at {}. Would that work for you?", format_currency(max)),
                "conditions": [
                    {"type": "regex", "value": r"\b(no|can't|won't)\b", "outcome": "declined", "caseInsensitive": true},
                    {"type": "regex", "value": r"\b(yes|okay|accept|fine)\b", "outcome": "accepted", "caseInsensitive": true}
                ],
                "nextSteps": {"declined": "exit", "accepted": "license"},
                "metadata": {"retry_message": "Could you let me know whether that budget works for you?"}
            },
            {
                "id": "license",
                "type": "branch",
                "content": "Do you hold an active RN license?",
                "conditions": [
                    {"type": "custom", "value": "no", "outcome": "unlicensed"},
                    {"type": "custom", "value": "yes", "outcome": "licensed"}
                ],
                "nextSteps": {"licensed": "license_details", "unlicensed": "license_timeline"},
                "metadata": {"retry_message": "Please answer yes or no: do you hold an active RN license?"}
            },
            {
                "id": "license_details",
                "type": "question",
                "content": "Please share your license number and its expiration date.",
                "nextSteps": {"default": "experience"}
            },
            {
                "id": "license_timeline",
                "type": "validation",
                "content": "In how many months do you expect to be licensed?",
                "conditions": [
                    {"type": "numeric", "value": format!("<= {months}"), "outcome": "soon"},
                    {"type": "numeric", "value": format!("> {months}"), "outcome": "too_long"}
                ],
                "nextSteps": {"soon": "experience", "too_long": "exit"}
            },
            {
                "id": "experience",
                "type": "branch",
                "content": "Do you have nursing experience?",
                "conditions": [
                    {"type": "regex", "value": r"\b(no|none|new grad)\b", "outcome": "none", "caseInsensitive": true}
                ],
                "nextSteps": {"none": "alternative_experience", "default": "experience_details"}
            },
            {
                "id": "alternative_experience",
                "type": "branch",
                "content": "Have you completed any clinical rotations in acute care or a hospital setting?",
                "conditions": [
                    {"type": "regex", "value": r"\b(yes|acute|hospital)\b", "outcome": "clinical", "caseInsensitive": true}
                ],
                "nextSteps": {"clinical": "experience_details", "default": "closing"}
            },
            {
                "id": "experience_details",
                "type": "question",
                "content": "Tell me a bit about your clinical background and the settings you've worked in.",
                "nextSteps": {"default": "closing"}
            },
            {
                "id": "closing",
                "type": "exit",
                "content": "Thank you! A recruiter will review your answers and follow up soon."
            }
        ]
    });

    serde_json::from_value(value).map_err(|e| TemplateError::Parse(e.to_string()))
}
