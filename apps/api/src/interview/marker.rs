//! Inline `[STATE:{...}]` marker used by legacy clients that carry interview
//! state inside the assistant's message text.
//!
//! The JSON API returns state as its own field; this codec only exists for
//! clients that opt in with `inline_state_marker` or send back
//! `last_assistant_message`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::interview::models::InterviewState;

const MARKER_PREFIX: &str = "[STATE:";

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[STATE:(\{.*?\})\]").expect("valid marker regex"));

/// Appends the state marker to `text`, dropping any marker already present so
/// the result carries exactly one.
pub fn append_marker(text: &str, state: &InterviewState) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(state)?;
    let visible = strip_marker(text);
    Ok(format!("{visible}\n\n{MARKER_PREFIX}{json}]"))
}

/// Visible text with every marker removed.
pub fn strip_marker(text: &str) -> String {
    if !text.contains(MARKER_PREFIX) {
        return text.to_string();
    }
    MARKER_RE.replace_all(text, "").trim_end().to_string()
}

/// Recovers the state from the last well-formed marker in `text`.
/// A missing or malformed marker (including an unknown stage) yields `None`.
pub fn parse_marker(text: &str) -> Option<InterviewState> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|json| match serde_json::from_str(json.as_str()) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("Ignoring malformed state marker: {e}");
                None
            }
        })
        .last()
}
