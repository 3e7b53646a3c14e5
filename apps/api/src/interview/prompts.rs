// Prompt composition for the screening interview.
// One canonical scripted question per stage; the same text doubles as the
// fallback reply when no LLM is configured or the call fails.

use crate::config::InterviewConfig;
use crate::interview::models::{InterviewState, Stage};
use crate::llm_client::prompts::{PERSONA_SYSTEM, STAY_ON_SCRIPT_INSTRUCTION};

const GREETING_QUESTION: &str = "Hi! I'm the hiring assistant for the {position} position. \
    Are you interested in discussing the role?";
const BASIC_INFO_QUESTION: &str = "Great! To get started, could you tell me your full name?";
const SALARY_DISCUSSION_QUESTION: &str =
    "Thanks, {name}! What are your salary expectations for this role?";
const SALARY_NEGOTIATION_QUESTION: &str = "Thanks for sharing. Your expectation of {desired} is \
    above our budget of {max} for this position. Would you be open to a salary within our range?";
const LICENSE_CHECK_QUESTION: &str =
    "Do you currently hold an active {position} license?";
const LICENSE_DETAILS_QUESTION: &str =
    "Could you share your license number and its expiration date?";
const LICENSE_TIMELINE_QUESTION: &str =
    "When do you expect to obtain your license? An estimate in months is fine.";
const EXPERIENCE_QUESTION: &str =
    "Do you have prior experience as a {position}? If so, how many years?";
const EXPERIENCE_DETAILS_QUESTION: &str =
    "Please describe your most recent role and your key responsibilities.";
const ALTERNATIVE_EXPERIENCE_QUESTION: &str = "Do you have any clinical or hospital experience, \
    such as acute care rotations during your training?";
const COMPLETED_MESSAGE: &str = "Thank you, {name}! That's everything we need for now. \
    A recruiter will review your answers and follow up with next steps.";
const ENDED_EARLY_MESSAGE: &str = "Thank you for your time, {name}. Based on your answers \
    we won't be moving forward right now ({reason}). We wish you the best in your search.";

const SYSTEM_TEMPLATE: &str = "{persona}

Position: {position}
Salary budget: up to {max}

Candidate information collected so far:
{facts}

Current stage: {stage}
Your next goal: {goal}

{rules}";

/// Output of prompt composition: the LLM instruction and its scripted stand-in.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub system_prompt: String,
    pub fallback_question: String,
}

/// Builds the next instruction and scripted question for `state`. Pure formatting.
pub fn compose(state: &InterviewState, config: &InterviewConfig) -> ComposedPrompt {
    let fallback_question = scripted_question(state, config);

    let goal = if state.completed {
        format!("Close the conversation politely. Say, in your own words: \"{fallback_question}\"")
    } else {
        format!("Ask the candidate, in your own words: \"{fallback_question}\"")
    };

    let system_prompt = SYSTEM_TEMPLATE
        .replace("{persona}", PERSONA_SYSTEM)
        .replace("{position}", &config.position_title)
        .replace("{max}", &format_currency(config.max_salary))
        .replace("{facts}", &describe_facts(state))
        .replace("{stage}", state.stage.as_str())
        .replace("{goal}", &goal)
        .replace("{rules}", STAY_ON_SCRIPT_INSTRUCTION);

    ComposedPrompt {
        system_prompt,
        fallback_question,
    }
}

/// The canonical per-stage question, interpolated with collected fields.
pub fn scripted_question(state: &InterviewState, config: &InterviewConfig) -> String {
    let name = state.candidate_name.as_deref().unwrap_or("there");

    if state.completed {
        return if state.is_ended_early() {
            let reason = state.end_reason.as_deref().unwrap_or("screening criteria not met");
            ENDED_EARLY_MESSAGE
                .replace("{name}", name)
                .replace("{reason}", reason)
        } else {
            COMPLETED_MESSAGE.replace("{name}", name)
        };
    }

    let template = match state.stage {
        Stage::Greeting => GREETING_QUESTION,
        Stage::BasicInfo => BASIC_INFO_QUESTION,
        Stage::SalaryDiscussion => SALARY_DISCUSSION_QUESTION,
        Stage::SalaryNegotiation => SALARY_NEGOTIATION_QUESTION,
        Stage::LicenseCheck => LICENSE_CHECK_QUESTION,
        Stage::LicenseDetails => LICENSE_DETAILS_QUESTION,
        Stage::LicenseTimeline => LICENSE_TIMELINE_QUESTION,
        Stage::Experience => EXPERIENCE_QUESTION,
        Stage::ExperienceDetails => EXPERIENCE_DETAILS_QUESTION,
        Stage::AlternativeExperience => ALTERNATIVE_EXPERIENCE_QUESTION,
    };

    let desired = state
        .desired_salary
        .map(format_currency)
        .unwrap_or_else(|| "your expectation".to_string());

    template
        .replace("{position}", &config.position_title)
        .replace("{name}", name)
        .replace("{desired}", &desired)
        .replace("{max}", &format_currency(config.max_salary))
}

fn describe_facts(state: &InterviewState) -> String {
    let mut facts = Vec::new();
    if let Some(name) = &state.candidate_name {
        facts.push(format!("- Name: {name}"));
    }
    if let Some(salary) = state.desired_salary {
        facts.push(format!("- Desired salary: {}", format_currency(salary)));
    }
    if let Some(acceptable) = state.salary_acceptable {
        facts.push(format!("- Accepts budget: {}", yes_no(acceptable)));
    }
    if let Some(has_license) = state.has_license {
        facts.push(format!("- Licensed: {}", yes_no(has_license)));
    }
    if let Some(number) = &state.license_number {
        facts.push(format!("- License number: {number}"));
    }
    if let Some(expiry) = &state.license_expiry {
        facts.push(format!("- License expiry: {expiry}"));
    }
    if let Some(has_experience) = state.has_experience {
        facts.push(format!("- Prior experience: {}", yes_no(has_experience)));
    }
    if let Some(years) = state.experience_years {
        facts.push(format!("- Years of experience: {years}"));
    }
    if facts.is_empty() {
        "- Nothing yet".to_string()
    } else {
        facts.join("\n")
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// `85000.0` → `"$85,000"`; cents are kept only when present.
pub fn format_currency(amount: f64) -> String {
    let whole = amount.trunc() as u64;
    let cents = ((amount - amount.trunc()) * 100.0).round() as u64;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if cents > 0 {
        format!("${grouped}.{cents:02}")
    } else {
        format!("${grouped}")
    }
}
