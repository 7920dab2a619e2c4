use async_trait::async_trait;

use crate::error::Result;

/// Outbound plain-text delivery to the chat transport. Delivery is
/// best-effort: callers log failures and move on, they never retry or
/// roll back state because a message did not arrive.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()>;
    async fn notify_approver(&self, text: &str) -> Result<()>;
}
