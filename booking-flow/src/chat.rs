use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::session::{Mode, Session, SessionStore};
use crate::triggers::Vocabulary;
use crate::util::sanitize;

/// How many dialogue turns a session keeps. The answering service applies
/// its own (smaller) trailing window on top of this.
pub const MAX_STORED_TURNS: usize = 10;

const MAX_CHAT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Produces an answer for a free-form question. Implementations must
/// always mask transport failures: `None` means "no usable answer", never
/// a raw error.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn ask(&self, utterance: &str, history: &[ChatTurn]) -> Option<String>;
}

/// The free-form question-answering flow: a single `Active` state looping
/// on itself until the exit vocabulary is recognized.
pub struct ChatEngine {
    sessions: Arc<dyn SessionStore>,
    answers: Arc<dyn AnswerService>,
    vocab: Arc<Vocabulary>,
    /// Shown when the answering service has nothing usable to say.
    contact_fallback: String,
}

impl ChatEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        answers: Arc<dyn AnswerService>,
        vocab: Arc<Vocabulary>,
        contact_fallback: String,
    ) -> Self {
        Self {
            sessions,
            answers,
            vocab,
            contact_fallback,
        }
    }

    /// Enter the chat flow for this user.
    pub async fn start(&self, user_id: i64) -> Result<String> {
        let mut session = self
            .sessions
            .get(user_id)
            .await?
            .unwrap_or_else(|| Session::new(user_id));
        session.mode = Mode::Chat;
        session.chat_history.clear();
        self.sessions.save(session).await?;

        Ok("Ask me anything about our courses, studio packages or anything else. \
            Say \"back\" to return to the menu."
            .to_string())
    }

    /// Handle one chat turn. The exit signal only takes effect between
    /// turns; an in-flight call always runs to completion first.
    pub async fn handle(&self, user_id: i64, text: &str) -> Result<String> {
        let mut session = self
            .sessions
            .get(user_id)
            .await?
            .unwrap_or_else(|| Session::new(user_id));

        if self.vocab.is_back(text) {
            session.mode = Mode::Idle;
            session.chat_history.clear();
            self.sessions.save(session).await?;
            return Ok("Back to the main menu.".to_string());
        }

        let utterance = sanitize(text, MAX_CHAT_CHARS);
        match self.answers.ask(&utterance, &session.chat_history).await {
            Some(answer) => {
                session.chat_history.push(ChatTurn::user(utterance));
                session.chat_history.push(ChatTurn::assistant(answer.clone()));
                let excess = session.chat_history.len().saturating_sub(MAX_STORED_TURNS);
                if excess > 0 {
                    session.chat_history.drain(..excess);
                }
                self.sessions.save(session).await?;
                Ok(answer)
            }
            None => {
                info!(user_id, "no usable answer, substituting contact fallback");
                Ok(self.contact_fallback.clone())
            }
        }
    }
}
