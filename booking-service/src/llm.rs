use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use booking_flow::{AnswerService, ChatTurn, Role};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{error, info, warn};

use booking_flow::util::sanitize;

use crate::catalog;

pub const MAX_UTTERANCE_CHARS: usize = 1000;
/// Trailing turns of prior dialogue included in each request.
pub const MAX_HISTORY_MESSAGES: usize = 6;
pub const MAX_ATTEMPTS: u32 = 3;
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

pub const FALLBACK_SLOW: &str =
    "The answer is taking longer than usual. Please try again in a little while.";
pub const FALLBACK_RATE_LIMIT: &str =
    "We are receiving too many requests right now. Please wait a moment and try again.";
pub const FALLBACK_CONFIG: &str =
    "The assistant is not configured correctly. Please contact the administrator.";
pub const FALLBACK_EMPTY: &str = "I could not read that message. Please try again.";

/// One failed exchange with the completion endpoint, classified so the
/// caller can decide whether to retry.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("request timed out")]
    Timeout,
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response body")]
    Malformed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    fn from_turn(turn: &ChatTurn) -> Self {
        Self {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.text.clone(),
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

/// A single request/response exchange with the completion endpoint.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CallError>;
}

/// reqwest-backed implementation talking to an OpenAI-compatible
/// chat-completions endpoint.
pub struct HttpCompletionApi {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpCompletionApi {
    pub fn new(url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl CompletionApi for HttpCompletionApi {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CallError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "temperature": 0.7,
                "max_tokens": 800,
                "top_p": 0.9,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout
                } else {
                    CallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Status(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(|_| CallError::Malformed)?;
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(CallError::Malformed)
    }
}

/// Wraps the completion endpoint with bounded retries, error
/// classification and deterministic fallback text, so the conversation
/// always receives something displayable.
pub struct ResilientCaller {
    api: Arc<dyn CompletionApi>,
    preamble: RwLock<String>,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl ResilientCaller {
    pub fn new(api: Arc<dyn CompletionApi>, preamble: String) -> Self {
        Self {
            api,
            preamble: RwLock::new(preamble),
            max_attempts: MAX_ATTEMPTS,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_limits(
        api: Arc<dyn CompletionApi>,
        preamble: String,
        max_attempts: u32,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            api,
            preamble: RwLock::new(preamble),
            max_attempts,
            attempt_timeout,
        }
    }

    /// Swap the instruction preamble used by future calls. In-flight calls
    /// keep the text they started with.
    pub async fn set_preamble(&self, preamble: String) {
        *self.preamble.write().await = preamble;
        info!("instruction preamble replaced");
    }

    /// One question against the remote service. Returns `None` only when
    /// the remote definitively rejected the request (an unclassified 4xx
    /// or an unusable body); every other failure is masked behind one of
    /// the fallback strings.
    pub async fn ask(&self, utterance: &str, history: &[ChatTurn]) -> Option<String> {
        let utterance = sanitize(utterance, MAX_UTTERANCE_CHARS);
        if utterance.is_empty() {
            return Some(FALLBACK_EMPTY.to_string());
        }

        let mut messages = vec![ChatMessage::system(self.preamble.read().await.clone())];
        let window_start = history.len().saturating_sub(MAX_HISTORY_MESSAGES);
        messages.extend(history[window_start..].iter().map(ChatMessage::from_turn));
        messages.push(ChatMessage::user(utterance));

        for attempt in 1..=self.max_attempts {
            match timeout(self.attempt_timeout, self.api.complete(&messages)).await {
                Err(_) => {
                    warn!(attempt, max = self.max_attempts, "completion attempt timed out");
                }
                Ok(Ok(text)) => {
                    info!(attempt, "completion received");
                    return Some(text);
                }
                Ok(Err(CallError::Timeout)) => {
                    warn!(attempt, max = self.max_attempts, "completion attempt timed out");
                }
                Ok(Err(CallError::Status(code))) if (400..500).contains(&code) => {
                    error!(attempt, code, "remote rejected the request");
                    return match code {
                        401 => Some(FALLBACK_CONFIG.to_string()),
                        429 => Some(FALLBACK_RATE_LIMIT.to_string()),
                        _ => None,
                    };
                }
                Ok(Err(CallError::Status(code))) => {
                    warn!(attempt, code, "remote failure, will retry");
                }
                Ok(Err(CallError::Transport(detail))) => {
                    warn!(attempt, %detail, "transport failure, will retry");
                }
                Ok(Err(CallError::Malformed)) => {
                    error!(attempt, "unusable response body");
                    return None;
                }
            }
        }

        error!(attempts = self.max_attempts, "all completion attempts failed");
        Some(FALLBACK_SLOW.to_string())
    }
}

#[async_trait]
impl AnswerService for ResilientCaller {
    async fn ask(&self, utterance: &str, history: &[ChatTurn]) -> Option<String> {
        ResilientCaller::ask(self, utterance, history).await
    }
}

/// Load the knowledge text backing the instruction preamble, falling back
/// to the built-in catalog summary when the file is missing or empty.
pub fn load_knowledge(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            info!(path, chars = text.len(), "knowledge file loaded");
            text
        }
        Ok(_) => {
            warn!(path, "knowledge file is empty, using built-in fallback");
            catalog::default_knowledge()
        }
        Err(e) => {
            warn!(path, error = %e, "knowledge file unavailable, using built-in fallback");
            catalog::default_knowledge()
        }
    }
}

pub fn build_preamble(knowledge: &str) -> String {
    format!(
        "You are the assistant for {} and {}.\n\n\
         {}\n\n\
         Guidelines:\n\
         - Keep answers short, friendly and concrete.\n\
         - If someone wants to make a reservation, tell them to say \"book\".\n\
         - If a question is unrelated to the center or the studio, politely decline.\n\
         - Never claim knowledge that is not in the notes above.",
        catalog::CENTER.name,
        catalog::CENTER.studio,
        knowledge.trim(),
    )
}
