use std::sync::Arc;

use sqlx::SqlitePool;

use crate::interview::service::InterviewService;
use crate::template::catalog::TemplateCatalog;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Turn orchestration: extractor, engine, LLM gateway (optional) and persistence.
    pub interview: InterviewService,
    /// Validated templates, read-only after startup.
    pub templates: Arc<TemplateCatalog>,
}
