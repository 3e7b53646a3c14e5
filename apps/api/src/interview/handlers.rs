use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::interview::marker::append_marker;
use crate::interview::models::Conversation;
use crate::interview::repository::{self, ConversationSummary};
use crate::interview::service::{TurnOutcome, TurnRequest};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct StartConversationRequest {
    pub template_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(flatten)]
    pub turn: TurnRequest,
    /// Legacy clients read state back out of the reply text.
    #[serde(default)]
    pub inline_state_marker: bool,
}

/// POST /api/v1/conversations
pub async fn handle_start_conversation(
    State(state): State<AppState>,
    body: Option<Json<StartConversationRequest>>,
) -> Result<(StatusCode, Json<TurnOutcome>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(template_id) = req.template_id.as_deref() {
        if state.templates.get(template_id).is_none() {
            return Err(AppError::NotFound(format!("Template {template_id} not found")));
        }
    }

    let outcome = state
        .interview
        .start_conversation(req.template_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/v1/conversations
pub async fn handle_list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(repository::list_conversations(&state.db, limit).await?))
}

/// GET /api/v1/conversations/:id
pub async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, AppError> {
    repository::get_conversation(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Conversation {id} not found")))
}

/// DELETE /api/v1/conversations/:id
pub async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if repository::delete_conversation(&state.db, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Conversation {id} not found")))
    }
}

/// POST /api/v1/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    let mut outcome = state.interview.run_turn(req.turn).await?;
    if req.inline_state_marker {
        outcome.reply =
            append_marker(&outcome.reply, &outcome.state).map_err(|e| AppError::Internal(e.into()))?;
    }
    Ok(Json(outcome))
}

/// POST /api/v1/chat/stream
///
/// Server-sent events: `chunk`* then `done` (turn stored) or `fallback`
/// (stream broke mid-reply, nothing stored; the client should show the
/// scripted question it carries).
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let rx = state.interview.stream_turn(req).await?;

    let events = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok::<_, Infallible>(sse), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
