/// LLM Client: the single point of entry for all Claude API calls in the screener.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions go through the `LlmGateway` trait defined here.
///
/// The gateway is optional: without an API key the service answers with the
/// scripted per-stage questions instead.
use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::interview::models::{Message, Role};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls in the screener.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 512;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

/// One prior turn handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }

    /// Converts a transcript to model turns. The Messages API requires the
    /// first turn to come from the user, so a leading assistant greeting is dropped.
    pub fn from_transcript(messages: &[Message]) -> Vec<ChatTurn> {
        messages
            .iter()
            .skip_while(|m| m.role == Role::Assistant)
            .map(|m| match m.role {
                Role::User => ChatTurn::user(m.content.clone()),
                Role::Assistant => ChatTurn::assistant(m.content.clone()),
            })
            .collect()
    }
}

/// Text chunks as the model produces them.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// The language-model boundary. Carried in `AppState` as `Option<Arc<dyn LlmGateway>>`.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, system: &str, turns: &[ChatTurn]) -> Result<String, LlmError>;

    async fn stream_complete(&self, system: &str, turns: &[ChatTurn])
        -> Result<TokenStream, LlmError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatTurn],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Server-sent event payloads we care about while streaming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: AnthropicErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Wraps the Anthropic Messages API with retry logic and SSE streaming.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()?,
            api_key,
        })
    }

    fn request(&self, body: &AnthropicRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    /// Makes a raw call to the Claude API, returning the full response object.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(&self, system: &str, turns: &[ChatTurn]) -> Result<LlmResponse, LlmError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: turns,
            stream: false,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.request(&request_body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                return Err(api_error(response).await);
            }

            let llm_response: LlmResponse = response.json().await?;

            debug!(
                "LLM call succeeded: input_tokens={}, output_tokens={}",
                llm_response.usage.input_tokens, llm_response.usage.output_tokens
            );

            return Ok(llm_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl LlmGateway for LlmClient {
    async fn complete(&self, system: &str, turns: &[ChatTurn]) -> Result<String, LlmError> {
        let response = self.call(system, turns).await?;
        let text = response.text().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyContent);
        }
        Ok(text.to_string())
    }

    /// Opens a streaming call. No retry: once chunks reach the caller a replay
    /// would duplicate text.
    async fn stream_complete(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, LlmError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: turns,
            stream: true,
        };

        let response = self.request(&request_body).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(sse_text_stream(response.bytes_stream()))
    }
}

async fn api_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    // Try to parse error message
    let message = serde_json::from_str::<AnthropicError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    LlmError::Api { status, message }
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    /// Raw bytes of the current incomplete line. Decoded only once the
    /// newline arrives, so multi-byte characters split across chunks survive.
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

/// Turns a raw SSE byte stream into text deltas. Ends at `message_stop`
/// or when the connection closes.
fn sse_text_stream<S>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        match parse_sse_line(line.trim_end()) {
                            SseLine::Text(text) => state.pending.push_back(Ok(text)),
                            SseLine::Stop => {
                                state.finished = true;
                                break;
                            }
                            SseLine::Failed(message) => {
                                state.pending.push_back(Err(LlmError::Stream(message)));
                                break;
                            }
                            SseLine::Skip => {}
                        }
                    }
                }
                Some(Err(e)) => state.pending.push_back(Err(LlmError::Http(e))),
                None => state.finished = true,
            }
        }
    }))
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Text(String),
    Stop,
    Failed(String),
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    match serde_json::from_str::<StreamPayload>(data.trim()) {
        Ok(StreamPayload::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) => SseLine::Text(text),
        Ok(StreamPayload::MessageStop) => SseLine::Stop,
        Ok(StreamPayload::Error { error }) => SseLine::Failed(error.message),
        Ok(_) => SseLine::Skip,
        Err(e) => {
            debug!("Skipping unparseable SSE line: {e}");
            SseLine::Skip
        }
    }
}

/// In-process gateway double for service and route tests.
#[cfg(test)]
pub mod testing {
    use super::*;

    pub struct ScriptedGateway {
        reply: Option<String>,
        chunks: Vec<Result<String, String>>,
    }

    impl ScriptedGateway {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                chunks: Vec::new(),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: None,
                chunks: Vec::new(),
            }
        }

        pub fn streaming(chunks: Vec<Result<&str, &str>>) -> Self {
            Self {
                reply: None,
                chunks: chunks
                    .into_iter()
                    .map(|c| c.map(str::to_string).map_err(str::to_string))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn complete(&self, _system: &str, _turns: &[ChatTurn]) -> Result<String, LlmError> {
            self.reply.clone().ok_or(LlmError::Api {
                status: 529,
                message: "Overloaded".to_string(),
            })
        }

        async fn stream_complete(
            &self,
            _system: &str,
            _turns: &[ChatTurn],
        ) -> Result<TokenStream, LlmError> {
            if self.chunks.is_empty() {
                return Err(LlmError::EmptyContent);
            }
            let items: Vec<Result<String, LlmError>> = self
                .chunks
                .iter()
                .cloned()
                .map(|c| c.map_err(LlmError::Stream))
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(parse_sse_line(line), SseLine::Text("Hello".to_string()));
    }

    #[test]
    fn test_parse_sse_control_lines() {
        assert_eq!(parse_sse_line("event: message_stop"), SseLine::Skip);
        assert_eq!(parse_sse_line(r#"data: {"type":"message_stop"}"#), SseLine::Stop);
        assert_eq!(parse_sse_line(r#"data: {"type":"ping"}"#), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            SseLine::Failed("Overloaded".to_string())
        );
    }

    #[tokio::test]
    async fn test_sse_stream_yields_text_until_stop() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"What is \"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"your name?\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"ignored\"}}\n\n",
        );
        // Split mid-line to exercise buffering.
        let (a, b) = body.split_at(70);
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ];
        let stream = sse_text_stream(futures::stream::iter(chunks));
        let texts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(texts, vec!["What is ".to_string(), "your name?".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_stream_keeps_multibyte_text_split_across_chunks() {
        let body = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"You\u{2019}re great, Ren\u{e9}e\"}}\n\n";
        let bytes = body.as_bytes();
        // Cut inside the three-byte apostrophe and inside the two-byte é.
        let apostrophe = bytes.windows(3).position(|w| w == "\u{2019}".as_bytes()).unwrap();
        let accent = bytes.windows(2).position(|w| w == "\u{e9}".as_bytes()).unwrap();
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..apostrophe + 1])),
            Ok(Bytes::copy_from_slice(&bytes[apostrophe + 1..accent + 1])),
            Ok(Bytes::copy_from_slice(&bytes[accent + 1..])),
        ];
        let stream = sse_text_stream(futures::stream::iter(chunks));
        let texts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(texts, vec!["You\u{2019}re great, Ren\u{e9}e".to_string()]);
    }

    #[test]
    fn test_transcript_drops_leading_assistant_greeting() {
        let transcript = vec![
            Message::assistant("Hi! Are you interested?"),
            Message::user("yes"),
            Message::assistant("What's your name?"),
        ];
        let turns = ChatTurn::from_transcript(&transcript);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ChatTurn::user("yes"));
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn test_request_serializes_stream_flag_only_when_set() {
        let turns = vec![ChatTurn::user("hi")];
        let body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: "sys",
            messages: &turns,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
