use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A user known to the service, created on first contact and updated on
/// every interaction. Users are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: i64,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Upsert: create the user on first sight, otherwise bump `last_seen`
    /// and the message counter and refresh the descriptive fields.
    async fn record_interaction(
        &self,
        user_id: i64,
        display_name: &str,
        handle: Option<&str>,
    ) -> Result<()>;

    async fn get(&self, user_id: i64) -> Result<Option<UserProfile>>;

    async fn count(&self) -> Result<u64>;
}

/// In-memory implementation of `UserDirectory`.
pub struct InMemoryUserDirectory {
    users: Arc<DashMap<i64, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn record_interaction(
        &self,
        user_id: i64,
        display_name: &str,
        handle: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        self.users
            .entry(user_id)
            .and_modify(|profile| {
                profile.display_name = display_name.to_string();
                profile.handle = handle.map(str::to_string);
                profile.last_seen = now;
                profile.message_count += 1;
            })
            .or_insert_with(|| UserProfile {
                user_id,
                display_name: display_name.to_string(),
                handle: handle.map(str::to_string),
                first_seen: now,
                last_seen: now,
                message_count: 1,
            });
        Ok(())
    }

    async fn get(&self, user_id: i64) -> Result<Option<UserProfile>> {
        Ok(self.users.get(&user_id).map(|entry| entry.clone()))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.users.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_interaction_creates_then_updates() {
        let directory = InMemoryUserDirectory::new();
        directory
            .record_interaction(42, "Mona", Some("mona_k"))
            .await
            .unwrap();
        directory
            .record_interaction(42, "Mona K", Some("mona_k"))
            .await
            .unwrap();

        let profile = directory.get(42).await.unwrap().unwrap();
        assert_eq!(profile.message_count, 2);
        assert_eq!(profile.display_name, "Mona K");
        assert_eq!(directory.count().await.unwrap(), 1);
    }
}
