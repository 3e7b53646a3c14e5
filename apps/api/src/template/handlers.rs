use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::template::evaluator::{process_response, StepResult};
use crate::template::models::{TemplateDocument, TemplateSummary};
use crate::template::validator::{load_template, TemplateError};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ValidationFailure {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidationFailure>,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub step_id: String,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    #[serde(flatten)]
    pub result: StepResult,
    /// Prompt of the step being advanced to, for convenience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_content: Option<String>,
}

/// GET /api/v1/templates
pub async fn handle_list_templates(State(state): State<AppState>) -> Json<Vec<TemplateSummary>> {
    Json(state.templates.list())
}

/// GET /api/v1/templates/:id
pub async fn handle_get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TemplateDocument>, AppError> {
    let template = state
        .templates
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Template {id} not found")))?;
    Ok(Json(template.document().clone()))
}

/// POST /api/v1/templates/validate
///
/// Always 200; the body says whether the document would load.
pub async fn handle_validate_template(Json(body): Json<Value>) -> Json<ValidateResponse> {
    let result = serde_json::from_value::<TemplateDocument>(body)
        .map_err(|e| TemplateError::Parse(e.to_string()))
        .and_then(load_template);

    Json(match result {
        Ok(_) => ValidateResponse {
            valid: true,
            error: None,
        },
        Err(e) => ValidateResponse {
            valid: false,
            error: Some(ValidationFailure {
                code: e.code(),
                message: e.to_string(),
            }),
        },
    })
}

/// POST /api/v1/templates/:id/respond
pub async fn handle_template_respond(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, AppError> {
    let template = state
        .templates
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Template {id} not found")))?;
    let step = template
        .step(&req.step_id)
        .ok_or_else(|| AppError::NotFound(format!("Step {} not found in {id}", req.step_id)))?;

    let result = process_response(step, &req.response);
    let next_content = match &result {
        StepResult::Advance { next_step } => template.step(next_step).map(|s| s.content.clone()),
        _ => None,
    };

    Ok(Json(RespondResponse {
        result,
        next_content,
    }))
}
