pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::interview::handlers as interview;
use crate::state::AppState;
use crate::template::handlers as templates;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Conversations
        .route(
            "/api/v1/conversations",
            post(interview::handle_start_conversation).get(interview::handle_list_conversations),
        )
        .route(
            "/api/v1/conversations/:id",
            get(interview::handle_get_conversation).delete(interview::handle_delete_conversation),
        )
        // Turns
        .route("/api/v1/chat", post(interview::handle_chat))
        .route("/api/v1/chat/stream", post(interview::handle_chat_stream))
        // Templates
        .route("/api/v1/templates", get(templates::handle_list_templates))
        .route(
            "/api/v1/templates/validate",
            post(templates::handle_validate_template),
        )
        .route("/api/v1/templates/:id", get(templates::handle_get_template))
        .route(
            "/api/v1/templates/:id/respond",
            post(templates::handle_template_respond),
        )
        .with_state(state)
}
