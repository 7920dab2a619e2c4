pub mod approval;
pub mod booking;
pub mod chat;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notify;
pub mod session;
pub mod triggers;
pub mod util;

// Re-export commonly used types
pub use approval::{ApprovalOutcome, ApprovalProtocol, Decision, approver_acknowledgment};
pub use booking::{
    Booking, BookingRepository, BookingStatus, Category, InMemoryBookingRepository, NewBooking,
};
pub use chat::{AnswerService, ChatEngine, ChatTurn, MAX_STORED_TURNS, Role};
pub use directory::{InMemoryUserDirectory, UserDirectory, UserProfile};
pub use engine::{BookingEngine, BookingState, StepEffect, StepOutcome, Transition, step};
pub use error::{FlowError, Result};
pub use notify::Notifier;
pub use session::{BookingDraft, InMemorySessionStore, Mode, Session, SessionStore};
pub use triggers::{Intent, Trigger, Vocabulary};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct CollectingNotifier {
        approver_notes: Mutex<Vec<String>>,
        user_messages: Mutex<Vec<(i64, String)>>,
    }

    impl CollectingNotifier {
        fn new() -> Self {
            Self {
                approver_notes: Mutex::new(Vec::new()),
                user_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for CollectingNotifier {
        async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
            self.user_messages
                .lock()
                .unwrap()
                .push((user_id, text.to_string()));
            Ok(())
        }

        async fn notify_approver(&self, text: &str) -> Result<()> {
            self.approver_notes.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Full round trip: a user books through the conversation, the approver
    /// confirms, and the requester is notified of the outcome.
    #[tokio::test]
    async fn booking_then_approval_round_trip() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let vocab = Arc::new(Vocabulary::default());

        let engine = BookingEngine::new(
            sessions.clone(),
            bookings.clone(),
            notifier.clone(),
            vocab.clone(),
        );
        let approver_id = 900;
        let protocol = ApprovalProtocol::new(
            bookings.clone(),
            notifier.clone(),
            Some(approver_id),
            "Call us on 01000000000".to_string(),
        );

        engine.start(55, "book a course").await.unwrap();
        for input in ["Mona Khalil", "01099887766", "Content production", "Saturday noon"] {
            engine.handle(55, input).await.unwrap();
        }
        engine.handle(55, "yes").await.unwrap();

        let pending = bookings.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        let booking_id = pending[0].id;
        assert_eq!(notifier.approver_notes.lock().unwrap().len(), 1);

        let outcome = protocol
            .apply(approver_id, Decision::Approve, booking_id)
            .await
            .unwrap();
        assert!(matches!(outcome, ApprovalOutcome::Applied { .. }));

        let stored = bookings.get_by_id(booking_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert!(bookings.list_pending().await.unwrap().is_empty());

        let messages = notifier.user_messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, 55);
    }
}
