use async_trait::async_trait;
use booking_flow::{FlowError, Notifier, Result};
use serde::Serialize;
use tracing::info;

/// Delivers plain-text notifications by POSTing them to the chat
/// transport's webhook. Without a configured URL every message is only
/// logged, which keeps local development working end to end.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    approver_id: Option<i64>,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    recipient_id: i64,
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, approver_id: Option<i64>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            approver_id,
        }
    }

    async fn deliver(&self, recipient_id: i64, text: &str) -> Result<()> {
        let Some(url) = &self.url else {
            info!(recipient_id, text, "notification (no transport configured)");
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .json(&OutboundMessage { recipient_id, text })
            .send()
            .await
            .map_err(|e| FlowError::Notification(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FlowError::Notification(format!(
                "transport returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
        self.deliver(user_id, text).await
    }

    async fn notify_approver(&self, text: &str) -> Result<()> {
        match self.approver_id {
            Some(approver_id) => self.deliver(approver_id, text).await,
            None => Err(FlowError::Notification(
                "no approver configured".to_string(),
            )),
        }
    }
}
