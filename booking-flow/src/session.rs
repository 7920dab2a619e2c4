use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::booking::Category;
use crate::chat::ChatTurn;
use crate::engine::BookingState;
use crate::error::Result;

/// What the user is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Idle,
    Booking(BookingState),
    Chat,
}

/// The partially collected booking fields. Every field is optional until
/// the corresponding step has accepted input for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingDraft {
    pub category: Option<Category>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub details: Option<String>,
    pub preferred_time: Option<String>,
}

/// Ephemeral per-user conversation state. Created lazily, overwritten on
/// every step, cleared on completion or cancellation. Not durable: a
/// restart loses in-flight drafts but never touches committed bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub mode: Mode,
    pub draft: BookingDraft,
    pub chat_history: Vec<ChatTurn>,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            mode: Mode::Idle,
            draft: BookingDraft::default(),
            chat_history: Vec::new(),
        }
    }
}

/// Storage for in-progress conversations, keyed by user id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<Option<Session>>;
    async fn save(&self, session: Session) -> Result<()>;
    async fn delete(&self, user_id: i64) -> Result<()>;
}

/// In-memory implementation of `SessionStore`.
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<i64, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: i64) -> Result<Option<Session>> {
        Ok(self.sessions.get(&user_id).map(|entry| entry.clone()))
    }

    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.user_id, session);
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> Result<()> {
        self.sessions.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_get_delete_round_trip() {
        let store = InMemorySessionStore::new();
        assert!(store.get(5).await.unwrap().is_none());

        let mut session = Session::new(5);
        session.mode = Mode::Booking(BookingState::CollectName);
        session.draft.category = Some(Category::Course);
        store.save(session).await.unwrap();

        let loaded = store.get(5).await.unwrap().unwrap();
        assert_eq!(loaded.mode, Mode::Booking(BookingState::CollectName));
        assert_eq!(loaded.draft.category, Some(Category::Course));

        store.delete(5).await.unwrap();
        assert!(store.get(5).await.unwrap().is_none());
    }
}
