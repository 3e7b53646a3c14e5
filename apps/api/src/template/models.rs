use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ────────────────────────────────────────────────────────────────────────────
// Documents: template JSON as loaded from disk or a request body.
// Every field is optional here; `validator::load_template` decides what is
// missing and turns a document into a typed `Template`.
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDocument {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<StepDocument>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub step_type: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionDocument>,
    #[serde(default)]
    pub next_steps: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionDocument {
    #[serde(rename = "type")]
    pub condition_type: Option<String>,
    pub value: Option<String>,
    pub outcome: Option<String>,
    #[serde(default, alias = "case_insensitive")]
    pub case_insensitive: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Validated, immutable template
// ────────────────────────────────────────────────────────────────────────────

/// Sentinel target that ends the walk.
pub const EXIT_TARGET: &str = "exit";
/// Outcome key used when no condition matches.
pub const DEFAULT_OUTCOME: &str = "default";
/// Condition outcome that rejects the response and asks the same step again.
/// Needs no `nextSteps` entry.
pub const RETRY_OUTCOME: &str = "retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Question,
    Validation,
    Branch,
    Exit,
}

impl StepKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "question" => Some(StepKind::Question),
            "validation" => Some(StepKind::Validation),
            "branch" => Some(StepKind::Branch),
            "exit" => Some(StepKind::Exit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Closed set of named predicates for `custom` conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomCheck {
    Yes,
    No,
    NonEmpty,
    Contains(String),
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    Numeric { op: Comparison, threshold: f64 },
    Custom(CustomCheck),
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub matcher: Matcher,
    pub outcome: String,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub content: String,
    pub conditions: Vec<Condition>,
    pub next_steps: BTreeMap<String, String>,
    pub metadata: Map<String, Value>,
}

impl Step {
    pub fn has_numeric_condition(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| matches!(c.matcher, Matcher::Numeric { .. }))
    }

    pub fn retry_message(&self) -> Option<&str> {
        self.metadata.get("retry_message").and_then(Value::as_str)
    }
}

/// A validated step graph. Read-only for its whole lifetime.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub steps: Vec<Step>,
    index: HashMap<String, usize>,
    document: TemplateDocument,
}

impl Template {
    pub(crate) fn new(
        id: String,
        name: String,
        version: String,
        description: Option<String>,
        steps: Vec<Step>,
        document: TemplateDocument,
    ) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.clone(), i))
            .collect();
        Self {
            id,
            name,
            version,
            description,
            steps,
            index,
            document,
        }
    }

    /// The first declared step. Validation guarantees there is one.
    pub fn entry(&self) -> &Step {
        &self.steps[0]
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// The document this template was validated from.
    pub fn document(&self) -> &TemplateDocument {
        &self.document
    }
}

/// Listing entry for the templates index.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub step_count: usize,
    pub entry_step: String,
}

impl From<&Template> for TemplateSummary {
    fn from(t: &Template) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            version: t.version.clone(),
            description: t.description.clone(),
            step_count: t.steps.len(),
            entry_step: t.entry().id.clone(),
        }
    }
}
