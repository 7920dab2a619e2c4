use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::booking::{Booking, BookingRepository, BookingStatus};
use crate::error::Result;
use crate::notify::Notifier;

/// The two actions an approver can take on a pending booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn target_status(&self) -> BookingStatus {
        match self {
            Decision::Approve => BookingStatus::Confirmed,
            Decision::Reject => BookingStatus::Rejected,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(Decision::Approve),
            "reject" => Some(Decision::Reject),
            _ => None,
        }
    }
}

/// What happened when a decision was applied. The status transition is
/// authoritative; requester notification is reported separately so callers
/// and tests can assert on both independently.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// The decider is not the configured approver. No state change, no
    /// user-visible signal.
    Ignored,
    NotFound(i64),
    Applied {
        booking: Booking,
        notification_delivered: bool,
    },
}

/// Correlates an approver's out-of-band decision with the stored booking,
/// updates its status and notifies the original requester.
pub struct ApprovalProtocol {
    bookings: Arc<dyn BookingRepository>,
    notifier: Arc<dyn Notifier>,
    approver_id: Option<i64>,
    contact_line: String,
}

impl ApprovalProtocol {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        notifier: Arc<dyn Notifier>,
        approver_id: Option<i64>,
        contact_line: String,
    ) -> Self {
        Self {
            bookings,
            notifier,
            approver_id,
            contact_line,
        }
    }

    /// Apply one decision. Re-delivery of a decision that already took
    /// effect is a no-op that still acknowledges the approver.
    pub async fn apply(
        &self,
        decider_id: i64,
        decision: Decision,
        booking_id: i64,
    ) -> Result<ApprovalOutcome> {
        match self.approver_id {
            Some(approver) if approver == decider_id => {}
            _ => {
                // Silently dropped: no hint about the approval mechanism
                // leaks to other originators.
                info!(decider_id, booking_id, "ignoring decision from non-approver");
                return Ok(ApprovalOutcome::Ignored);
            }
        }

        let booking = match self.bookings.get_by_id(booking_id).await? {
            Some(booking) => booking,
            None => {
                warn!(booking_id, "decision for unknown booking");
                return Ok(ApprovalOutcome::NotFound(booking_id));
            }
        };

        let target = decision.target_status();
        if booking.status == target {
            info!(booking_id, status = target.as_str(), "decision already applied");
            return Ok(ApprovalOutcome::Applied {
                booking,
                notification_delivered: true,
            });
        }

        if !self.bookings.set_status(booking_id, target).await? {
            // The row vanished between lookup and update.
            return Ok(ApprovalOutcome::NotFound(booking_id));
        }
        let mut booking = booking;
        booking.status = target;
        info!(booking_id, status = target.as_str(), "booking status updated");

        let message = requester_message(&booking, &self.contact_line);
        let notification_delivered =
            match self.notifier.notify_user(booking.owner_id, &message).await {
                Ok(()) => true,
                Err(e) => {
                    // Best effort only: the status change stands.
                    warn!(
                        booking_id,
                        owner_id = booking.owner_id,
                        error = %e,
                        "failed to notify requester"
                    );
                    false
                }
            };

        Ok(ApprovalOutcome::Applied {
            booking,
            notification_delivered,
        })
    }
}

fn requester_message(booking: &Booking, contact_line: &str) -> String {
    match booking.status {
        BookingStatus::Confirmed => format!(
            "Your booking is confirmed!\n\
             Type: {}\n\
             Details: {}\n\
             Preferred time: {}\n\
             We will be in touch shortly.",
            booking.category.label(),
            booking.details,
            booking.preferred_time,
        ),
        BookingStatus::Rejected => format!(
            "Unfortunately we could not confirm your booking for the requested time.\n\
             {contact_line} and we will find an alternative."
        ),
        BookingStatus::Pending => String::new(),
    }
}

/// Build the acknowledgment text sent back to the approver.
pub fn approver_acknowledgment(outcome: &ApprovalOutcome) -> Option<String> {
    match outcome {
        ApprovalOutcome::Ignored => None,
        ApprovalOutcome::NotFound(id) => Some(format!("Booking #{id} not found.")),
        ApprovalOutcome::Applied { booking, .. } => Some(format!(
            "Booking #{} ({}, {}) is now {}.",
            booking.id,
            booking.name,
            booking.category.label(),
            booking.status.as_str(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Category, InMemoryBookingRepository, NewBooking};
    use crate::error::FlowError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingNotifier {
        fail_user_delivery: AtomicBool,
        user_messages: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                fail_user_delivery: AtomicBool::new(false),
                user_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_user(&self, user_id: i64, text: &str) -> Result<()> {
            if self.fail_user_delivery.load(Ordering::SeqCst) {
                return Err(FlowError::Notification("transport down".to_string()));
            }
            self.user_messages
                .lock()
                .unwrap()
                .push((user_id, text.to_string()));
            Ok(())
        }

        async fn notify_approver(&self, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    const APPROVER: i64 = 777;

    async fn seeded() -> (ApprovalProtocol, Arc<InMemoryBookingRepository>, Arc<RecordingNotifier>, i64)
    {
        let repo = Arc::new(InMemoryBookingRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let id = repo
            .create(NewBooking {
                owner_id: 42,
                name: "Ali Hassan".to_string(),
                phone: "01012345678".to_string(),
                category: Category::Course,
                details: "Teaching skills".to_string(),
                preferred_time: "Thursday 4pm".to_string(),
            })
            .await
            .unwrap();
        let protocol = ApprovalProtocol::new(
            repo.clone(),
            notifier.clone(),
            Some(APPROVER),
            "Call us on 01000000000".to_string(),
        );
        (protocol, repo, notifier, id)
    }

    #[tokio::test]
    async fn approve_updates_status_and_notifies_requester() {
        let (protocol, repo, notifier, id) = seeded().await;

        let outcome = protocol.apply(APPROVER, Decision::Approve, id).await.unwrap();
        match &outcome {
            ApprovalOutcome::Applied {
                booking,
                notification_delivered,
            } => {
                assert_eq!(booking.status, BookingStatus::Confirmed);
                assert!(notification_delivered);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);

        let messages = notifier.user_messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, 42);
        assert!(messages[0].1.contains("confirmed"));

        let ack = approver_acknowledgment(&outcome).unwrap();
        assert!(ack.contains(&format!("#{id}")));
        assert!(ack.contains("confirmed"));
    }

    #[tokio::test]
    async fn last_decision_wins_and_redelivery_is_a_noop() {
        let (protocol, repo, notifier, id) = seeded().await;

        protocol.apply(APPROVER, Decision::Reject, id).await.unwrap();
        protocol.apply(APPROVER, Decision::Approve, id).await.unwrap();
        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);

        let before = notifier.user_messages.lock().unwrap().len();
        let outcome = protocol.apply(APPROVER, Decision::Approve, id).await.unwrap();
        match outcome {
            ApprovalOutcome::Applied {
                booking,
                notification_delivered,
            } => {
                assert_eq!(booking.status, BookingStatus::Confirmed);
                assert!(notification_delivered);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The no-op did not re-notify the requester.
        assert_eq!(notifier.user_messages.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn rejection_message_includes_contact_fallback() {
        let (protocol, _repo, notifier, id) = seeded().await;
        protocol.apply(APPROVER, Decision::Reject, id).await.unwrap();

        let messages = notifier.user_messages.lock().unwrap();
        assert!(messages[0].1.contains("Call us on 01000000000"));
    }

    #[tokio::test]
    async fn non_approver_is_silently_ignored() {
        let (protocol, repo, notifier, id) = seeded().await;

        let outcome = protocol.apply(1234, Decision::Approve, id).await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Ignored);
        assert!(approver_acknowledgment(&outcome).is_none());

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert!(notifier.user_messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_booking_reports_not_found() {
        let (protocol, _repo, _notifier, _id) = seeded().await;
        let outcome = protocol.apply(APPROVER, Decision::Approve, 9999).await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::NotFound(9999));
        assert_eq!(
            approver_acknowledgment(&outcome).unwrap(),
            "Booking #9999 not found."
        );
    }

    #[tokio::test]
    async fn notification_failure_does_not_roll_back_status() {
        let (protocol, repo, notifier, id) = seeded().await;
        notifier.fail_user_delivery.store(true, Ordering::SeqCst);

        let outcome = protocol.apply(APPROVER, Decision::Approve, id).await.unwrap();
        match outcome {
            ApprovalOutcome::Applied {
                booking,
                notification_delivered,
            } => {
                assert_eq!(booking.status, BookingStatus::Confirmed);
                assert!(!notification_delivered);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }
}
