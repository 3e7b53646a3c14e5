//! Interview turn orchestration.
//!
//! Flow per user message: load conversation → extract → apply → compose →
//! LLM reply (or scripted fallback) → persist state + both messages in one
//! transaction.
//!
//! Streaming turns split the LLM call into a producer task (gateway chunks →
//! channel) and a relay task (forwards each chunk to the client, accumulates,
//! commits once the stream closes cleanly). Nothing partial is ever committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::InterviewConfig;
use crate::errors::AppError;
use crate::interview::engine;
use crate::interview::extractor::FieldExtractor;
use crate::interview::marker::{parse_marker, strip_marker};
use crate::interview::models::{InterviewState, Message};
use crate::interview::prompts::{compose, scripted_question, ComposedPrompt};
use crate::interview::repository;
use crate::llm_client::{ChatTurn, LlmGateway};

const STREAM_BUFFER: usize = 32;

/// Where the assistant reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Llm,
    Fallback,
    /// The conversation was already completed; no transition ran.
    Closed,
}

/// One incoming candidate message plus the optional state hints a stateless
/// client can send.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: Option<Uuid>,
    pub message: String,
    /// Used only when the conversation is not stored yet.
    #[serde(default)]
    pub state: Option<InterviewState>,
    /// Previous assistant text carrying a `[STATE:...]` marker.
    #[serde(default)]
    pub last_assistant_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: Uuid,
    pub reply: String,
    pub state: InterviewState,
    pub completed: bool,
    pub source: ReplySource,
}

/// Events delivered to a streaming client, in order: `chunk`*, then either
/// `done` (turn committed) or `fallback` (stream broke, nothing committed).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk { text: String },
    Fallback { text: String },
    Done { outcome: TurnOutcome },
    Error { message: String },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Fallback { .. } => "fallback",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Serializes turns per conversation id: at most one in flight at a time.
#[derive(Clone, Default)]
pub struct TurnLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl TurnLocks {
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop idle entries so the table does not grow with every conversation.
            map.retain(|key, lock| *key == id || Arc::strong_count(lock) > 1);
            map.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct PreparedTurn {
    conversation_id: Uuid,
    template_id: Option<String>,
    next: InterviewState,
    composed: ComposedPrompt,
    turns: Vec<ChatTurn>,
    user_message: Message,
}

enum Prepared {
    Turn(PreparedTurn),
    Closed(TurnOutcome),
}

#[derive(Debug)]
enum ProducerEvent {
    Chunk(String),
    Failed(String),
}

/// Everything a turn needs, built once at startup.
#[derive(Clone)]
pub struct InterviewService {
    pool: SqlitePool,
    llm: Option<Arc<dyn LlmGateway>>,
    config: Arc<InterviewConfig>,
    extractor: Arc<dyn FieldExtractor>,
    locks: TurnLocks,
}

impl InterviewService {
    pub fn new(
        pool: SqlitePool,
        llm: Option<Arc<dyn LlmGateway>>,
        config: Arc<InterviewConfig>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            pool,
            llm,
            config,
            extractor,
            locks: TurnLocks::default(),
        }
    }

    /// Creates a conversation at `greeting` and stores the opening question.
    pub async fn start_conversation(&self, template_id: Option<&str>) -> Result<TurnOutcome, AppError> {
        let conversation_id = Uuid::new_v4();
        let state = InterviewState::new();
        let reply = scripted_question(&state, &self.config);

        repository::upsert_conversation(
            &self.pool,
            conversation_id,
            template_id,
            &state,
            &[Message::assistant(reply.clone())],
        )
        .await?;

        info!("Started conversation {conversation_id}");
        Ok(TurnOutcome {
            conversation_id,
            reply,
            completed: false,
            state,
            source: ReplySource::Fallback,
        })
    }

    /// Runs one full request/response turn.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, AppError> {
        let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.locks.acquire(conversation_id).await;

        let turn = match self.prepare(conversation_id, request).await? {
            Prepared::Closed(outcome) => return Ok(outcome),
            Prepared::Turn(turn) => turn,
        };

        let (reply, source) = match &self.llm {
            Some(llm) => match llm.complete(&turn.composed.system_prompt, &turn.turns).await {
                Ok(text) => (strip_marker(&text), ReplySource::Llm),
                Err(e) => {
                    warn!("LLM call failed for {conversation_id}, using scripted question: {e}");
                    (turn.composed.fallback_question.clone(), ReplySource::Fallback)
                }
            },
            None => (turn.composed.fallback_question.clone(), ReplySource::Fallback),
        };

        commit(&self.pool, turn, reply, source).await
    }

    /// Starts a streaming turn and returns the client-side event channel.
    pub async fn stream_turn(
        &self,
        request: TurnRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, AppError> {
        let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
        let guard = self.locks.acquire(conversation_id).await;
        let (client_tx, client_rx) = mpsc::channel(STREAM_BUFFER);

        let turn = match self.prepare(conversation_id, request).await? {
            Prepared::Closed(outcome) => {
                let _ = client_tx
                    .send(StreamEvent::Chunk {
                        text: outcome.reply.clone(),
                    })
                    .await;
                let _ = client_tx.send(StreamEvent::Done { outcome }).await;
                return Ok(client_rx);
            }
            Prepared::Turn(turn) => turn,
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(produce(
            self.llm.clone(),
            turn.composed.system_prompt.clone(),
            turn.turns.clone(),
            chunk_tx,
        ));
        tokio::spawn(relay(self.pool.clone(), turn, chunk_rx, client_tx, guard));

        Ok(client_rx)
    }

    async fn prepare(&self, conversation_id: Uuid, request: TurnRequest) -> Result<Prepared, AppError> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(AppError::Validation("message cannot be empty".to_string()));
        }

        let stored = repository::get_conversation(&self.pool, conversation_id).await?;
        let (state, history, template_id) = match stored {
            Some(conversation) => (conversation.state, conversation.messages, conversation.template_id),
            None => {
                let recovered = request.state.or_else(|| {
                    request
                        .last_assistant_message
                        .as_deref()
                        .and_then(parse_marker)
                });
                let recovered = recovered.map(engine::normalize).unwrap_or_default();
                (recovered, Vec::new(), None)
            }
        };

        if state.completed {
            info!("Conversation {conversation_id} already completed, ignoring message");
            return Ok(Prepared::Closed(TurnOutcome {
                conversation_id,
                reply: scripted_question(&state, &self.config),
                completed: true,
                state,
                source: ReplySource::Closed,
            }));
        }

        let update = self.extractor.extract(text, &state);
        let next = engine::apply(state, update);
        let composed = compose(&next, &self.config);

        let mut turns = ChatTurn::from_transcript(&history);
        turns.push(ChatTurn::user(text));

        Ok(Prepared::Turn(PreparedTurn {
            conversation_id,
            template_id,
            next,
            composed,
            turns,
            user_message: Message::user(text),
        }))
    }
}

async fn commit(
    pool: &SqlitePool,
    turn: PreparedTurn,
    reply: String,
    source: ReplySource,
) -> Result<TurnOutcome, AppError> {
    let PreparedTurn {
        conversation_id,
        template_id,
        next,
        user_message,
        ..
    } = turn;

    repository::upsert_conversation(
        pool,
        conversation_id,
        template_id.as_deref(),
        &next,
        &[user_message, Message::assistant(reply.clone())],
    )
    .await?;

    Ok(TurnOutcome {
        conversation_id,
        reply,
        completed: next.completed,
        state: next,
        source,
    })
}

/// Producer: forwards gateway chunks until the stream ends, fails, or the relay hangs up.
async fn produce(
    llm: Option<Arc<dyn LlmGateway>>,
    system: String,
    turns: Vec<ChatTurn>,
    tx: mpsc::Sender<ProducerEvent>,
) {
    let Some(llm) = llm else {
        let _ = tx.send(ProducerEvent::Failed("LLM not configured".to_string())).await;
        return;
    };

    let mut stream = match llm.stream_complete(&system, &turns).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(ProducerEvent::Failed(e.to_string())).await;
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(text) => ProducerEvent::Chunk(text),
            Err(e) => ProducerEvent::Failed(e.to_string()),
        };
        let failed = matches!(event, ProducerEvent::Failed(_));
        if tx.send(event).await.is_err() || failed {
            return;
        }
    }
}

/// Relay: forwards to the client, accumulates, and commits on clean close.
async fn relay(
    pool: SqlitePool,
    turn: PreparedTurn,
    mut rx: mpsc::Receiver<ProducerEvent>,
    client: mpsc::Sender<StreamEvent>,
    _guard: OwnedMutexGuard<()>,
) {
    let conversation_id = turn.conversation_id;
    let fallback = turn.composed.fallback_question.clone();
    let mut text = String::new();
    let mut source = ReplySource::Llm;

    while let Some(event) = rx.recv().await {
        match event {
            ProducerEvent::Chunk(chunk) => {
                if client
                    .send(StreamEvent::Chunk {
                        text: chunk.clone(),
                    })
                    .await
                    .is_err()
                {
                    info!("Client left conversation {conversation_id} mid-stream, discarding turn");
                    return;
                }
                text.push_str(&chunk);
            }
            ProducerEvent::Failed(reason) if text.is_empty() => {
                warn!("LLM stream unavailable for {conversation_id}, using scripted question: {reason}");
                text = fallback.clone();
                source = ReplySource::Fallback;
                if client
                    .send(StreamEvent::Chunk {
                        text: fallback.clone(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                break;
            }
            ProducerEvent::Failed(reason) => {
                warn!("LLM stream for {conversation_id} broke mid-reply, turn not committed: {reason}");
                let _ = client.send(StreamEvent::Fallback { text: fallback }).await;
                return;
            }
        }
    }

    let reply = strip_marker(&text);
    let (reply, source) = if reply.trim().is_empty() {
        let _ = client
            .send(StreamEvent::Chunk {
                text: fallback.clone(),
            })
            .await;
        (fallback, ReplySource::Fallback)
    } else {
        (reply, source)
    };

    let event = match commit(&pool, turn, reply, source).await {
        Ok(outcome) => StreamEvent::Done { outcome },
        Err(e) => {
            tracing::error!("Failed to store streamed turn for {conversation_id}: {e}");
            StreamEvent::Error {
                message: "The conversation could not be saved".to_string(),
            }
        }
    };
    let _ = client.send(event).await;
}
