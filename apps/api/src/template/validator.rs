//! Template validation: runs once at load time.
//!
//! A malformed template fails here with a named error and never reaches step
//! processing. Checks, in order: required fields, at least one step, unique
//! step ids, known step types, well-formed conditions, resolvable targets,
//! outcomes that map to a target, no dead ends, and no cycle reachable from
//! the entry step.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::template::models::{
    Comparison, Condition, ConditionDocument, CustomCheck, Matcher, Step, StepDocument, StepKind,
    Template, TemplateDocument, EXIT_TARGET, RETRY_OUTCOME,
};

static NUMERIC_CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(<=|>=|<|>|=)?\s*([+-]?\d+(?:\.\d+)?)\s*$").expect("valid numeric condition regex")
});

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("Template document is not valid JSON: {0}")]
    Parse(String),

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Template must contain at least one step")]
    NoSteps,

    #[error("Duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("Step '{step}' has unknown type '{value}'")]
    UnknownStepType { step: String, value: String },

    #[error("Step '{step}' condition #{index}: {reason}")]
    InvalidCondition {
        step: String,
        index: usize,
        reason: String,
    },

    #[error("Step '{step}' outcome '{outcome}' points to unknown step '{target}'")]
    UnknownTarget {
        step: String,
        outcome: String,
        target: String,
    },

    #[error("Step '{step}' condition outcome '{outcome}' has no entry in nextSteps")]
    MissingOutcomeTarget { step: String, outcome: String },

    #[error("Step '{0}' has no next steps and is not an exit step")]
    DeadEnd(String),

    #[error("Cycle detected involving step '{0}'")]
    Cycle(String),
}

impl TemplateError {
    /// Stable machine-readable name of the failure.
    pub fn code(&self) -> &'static str {
        match self {
            TemplateError::Parse(_) => "PARSE_ERROR",
            TemplateError::MissingField(_) => "MISSING_FIELD",
            TemplateError::NoSteps => "NO_STEPS",
            TemplateError::DuplicateStepId(_) => "DUPLICATE_STEP_ID",
            TemplateError::UnknownStepType { .. } => "UNKNOWN_STEP_TYPE",
            TemplateError::InvalidCondition { .. } => "INVALID_CONDITION",
            TemplateError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            TemplateError::MissingOutcomeTarget { .. } => "MISSING_OUTCOME_TARGET",
            TemplateError::DeadEnd(_) => "DEAD_END",
            TemplateError::Cycle(_) => "CYCLE",
        }
    }
}

/// Validates a document into an immutable `Template`.
pub fn load_template(document: TemplateDocument) -> Result<Template, TemplateError> {
    let id = required(document.id.as_deref(), "id")?;
    let name = required(document.name.as_deref(), "name")?;
    let version = document
        .version
        .clone()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "1.0".to_string());

    let raw_steps = document
        .steps
        .as_ref()
        .ok_or_else(|| TemplateError::MissingField("steps".to_string()))?;
    if raw_steps.is_empty() {
        return Err(TemplateError::NoSteps);
    }

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw_steps.len());
    for (position, raw) in raw_steps.iter().enumerate() {
        let step = parse_step(position, raw)?;
        if !seen.insert(step.id.clone()) {
            return Err(TemplateError::DuplicateStepId(step.id));
        }
        steps.push(step);
    }

    check_targets(&steps)?;
    check_acyclic(&steps)?;

    Ok(Template::new(
        id,
        name,
        version,
        document.description.clone(),
        steps,
        document,
    ))
}

fn required(value: Option<&str>, field: &str) -> Result<String, TemplateError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TemplateError::MissingField(field.to_string()))
}

fn parse_step(position: usize, raw: &StepDocument) -> Result<Step, TemplateError> {
    let id = required(raw.id.as_deref(), &format!("steps[{position}].id"))?;
    let type_name = required(raw.step_type.as_deref(), &format!("steps[{position}].type"))?;
    let kind = StepKind::parse(&type_name).ok_or_else(|| TemplateError::UnknownStepType {
        step: id.clone(),
        value: type_name.clone(),
    })?;
    let content = required(raw.content.as_deref(), &format!("steps[{position}].content"))?;

    let conditions = raw
        .conditions
        .iter()
        .enumerate()
        .map(|(index, c)| parse_condition(&id, index, c))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Step {
        id,
        kind,
        content,
        conditions,
        next_steps: raw.next_steps.clone(),
        metadata: raw.metadata.clone(),
    })
}

fn parse_condition(
    step: &str,
    index: usize,
    raw: &ConditionDocument,
) -> Result<Condition, TemplateError> {
    let invalid = |reason: String| TemplateError::InvalidCondition {
        step: step.to_string(),
        index,
        reason,
    };

    let condition_type = raw
        .condition_type
        .as_deref()
        .ok_or_else(|| invalid("missing type".to_string()))?;
    let value = raw
        .value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| invalid("value must be non-empty".to_string()))?;
    let outcome = raw
        .outcome
        .as_deref()
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| invalid("missing outcome".to_string()))?;

    let matcher = match condition_type {
        "regex" => RegexBuilder::new(value)
            .case_insensitive(raw.case_insensitive)
            .build()
            .map(Matcher::Regex)
            .map_err(|e| invalid(format!("invalid regex: {e}")))?,
        "numeric" => parse_numeric(value).ok_or_else(|| {
            invalid(format!("numeric value must look like '<= 72000', got '{value}'"))
        })?,
        "custom" => parse_custom(value)
            .map(Matcher::Custom)
            .ok_or_else(|| invalid(format!("unknown custom check '{value}'")))?,
        other => return Err(invalid(format!("unknown condition type '{other}'"))),
    };

    Ok(Condition {
        matcher,
        outcome: outcome.to_string(),
    })
}

/// `"<= 72000"` → `Le 72000`. A bare number means equality.
fn parse_numeric(value: &str) -> Option<Matcher> {
    let caps = NUMERIC_CONDITION_RE.captures(value)?;
    let op = match caps.get(1).map(|m| m.as_str()) {
        Some("<") => Comparison::Lt,
        Some("<=") => Comparison::Le,
        Some(">") => Comparison::Gt,
        Some(">=") => Comparison::Ge,
        Some("=") | None => Comparison::Eq,
        Some(_) => return None,
    };
    let threshold = caps.get(2)?.as_str().parse().ok()?;
    Some(Matcher::Numeric { op, threshold })
}

fn parse_custom(value: &str) -> Option<CustomCheck> {
    let value = value.trim();
    match value {
        "yes" => Some(CustomCheck::Yes),
        "no" => Some(CustomCheck::No),
        "non_empty" => Some(CustomCheck::NonEmpty),
        _ => value
            .strip_prefix("contains:")
            .map(str::trim)
            .filter(|word| !word.is_empty())
            .map(|word| CustomCheck::Contains(word.to_lowercase())),
    }
}

fn check_targets(steps: &[Step]) -> Result<(), TemplateError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();

    for step in steps {
        for (outcome, target) in &step.next_steps {
            if target != EXIT_TARGET && !ids.contains(target.as_str()) {
                return Err(TemplateError::UnknownTarget {
                    step: step.id.clone(),
                    outcome: outcome.clone(),
                    target: target.clone(),
                });
            }
        }
        for condition in &step.conditions {
            if condition.outcome != RETRY_OUTCOME && !step.next_steps.contains_key(&condition.outcome) {
                return Err(TemplateError::MissingOutcomeTarget {
                    step: step.id.clone(),
                    outcome: condition.outcome.clone(),
                });
            }
        }
        if step.kind != StepKind::Exit && step.next_steps.is_empty() {
            return Err(TemplateError::DeadEnd(step.id.clone()));
        }
    }
    Ok(())
}

/// Builds the step graph, keeps the part reachable from the entry step, and
/// topologically sorts it. Both walks are iterative, so chain length is bounded
/// only by memory.
fn check_acyclic(steps: &[Step]) -> Result<(), TemplateError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<NodeIndex> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();
    let id_to_idx: HashMap<&str, NodeIndex> = steps
        .iter()
        .zip(&node_indices)
        .map(|(s, idx)| (s.id.as_str(), *idx))
        .collect();

    for (step, from) in steps.iter().zip(&node_indices) {
        for target in step.next_steps.values() {
            if target == EXIT_TARGET {
                continue;
            }
            if let Some(to) = id_to_idx.get(target.as_str()) {
                graph.update_edge(*from, *to, ());
            }
        }
    }

    let mut reachable = HashSet::new();
    let mut dfs = Dfs::new(&graph, node_indices[0]);
    while let Some(node) = dfs.next(&graph) {
        reachable.insert(node);
    }
    let reachable_graph = graph.filter_map(
        |idx, id| reachable.contains(&idx).then_some(*id),
        |_, _| Some(()),
    );

    toposort(&reachable_graph, None).map_err(|cycle| {
        TemplateError::Cycle(reachable_graph[cycle.node_id()].to_string())
    })?;
    Ok(())
}
