use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::booking::{BookingRepository, Category, NewBooking};
use crate::error::{FlowError, Result};
use crate::notify::Notifier;
use crate::session::{BookingDraft, Mode, Session, SessionStore};
use crate::triggers::{Trigger, Vocabulary};
use crate::util::{extract_digits, sanitize};

pub const MIN_NAME_CHARS: usize = 3;
pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;

const MAX_NAME_CHARS: usize = 200;
const MAX_PHONE_CHARS: usize = 20;
const MAX_DETAILS_CHARS: usize = 1000;
const MAX_TIME_CHARS: usize = 200;

/// The steps of the booking conversation, in collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingState {
    SelectCategory,
    CollectName,
    CollectPhone,
    CollectDetails,
    CollectDate,
    Confirm,
}

/// Where the conversation goes after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Re-prompt; the state does not change.
    Stay,
    Next(BookingState),
    /// Conversation over, session returns to idle.
    Idle,
}

/// Side effect the driver must carry out after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEffect {
    None,
    /// The user confirmed: persist the draft and arm the approval protocol.
    Commit,
}

#[derive(Debug)]
pub struct StepOutcome {
    /// Reply for the user. `None` only when the driver composes the reply
    /// itself (the commit path, whose text depends on the storage result).
    pub reply: Option<String>,
    pub transition: Transition,
    pub effect: StepEffect,
}

impl StepOutcome {
    fn stay(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            transition: Transition::Stay,
            effect: StepEffect::None,
        }
    }

    fn next(reply: impl Into<String>, state: BookingState) -> Self {
        Self {
            reply: Some(reply.into()),
            transition: Transition::Next(state),
            effect: StepEffect::None,
        }
    }

    fn cancelled() -> Self {
        Self {
            reply: Some(
                "Booking cancelled. Say \"book\" whenever you want to start again.".to_string(),
            ),
            transition: Transition::Idle,
            effect: StepEffect::None,
        }
    }
}

pub fn valid_name(name: &str) -> bool {
    name.trim().chars().count() >= MIN_NAME_CHARS
}

/// Acceptance rule for phone input: the extracted digit count must lie in
/// [10, 15]. Formatting characters are ignored; no prefix restriction, so
/// international numbers pass as long as they fit the range.
pub fn valid_phone(phone: &str) -> bool {
    let digits = extract_digits(phone);
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
}

fn name_prompt() -> String {
    "Great, let's get you booked. What is your full name?".to_string()
}

fn details_prompt(category: Category) -> String {
    match category {
        Category::Course => "Which course are you interested in?".to_string(),
        Category::StudioSession => "Which studio package would you like?".to_string(),
    }
}

fn summary(draft: &BookingDraft) -> String {
    let category = draft
        .category
        .map(|c| c.label())
        .unwrap_or("unspecified");
    format!(
        "Here is your booking summary:\n\
         Name: {}\n\
         Phone: {}\n\
         Type: {}\n\
         Details: {}\n\
         Preferred time: {}\n\n\
         Shall I submit it? (yes / no)",
        draft.name.as_deref().unwrap_or("-"),
        draft.phone.as_deref().unwrap_or("-"),
        category,
        draft.details.as_deref().unwrap_or("-"),
        draft.preferred_time.as_deref().unwrap_or("-"),
    )
}

/// Pure transition function for one booking step.
///
/// A back/cancel signal is checked before any field validation and
/// terminates to idle from every state. Everything else either stores a
/// field and advances, or re-prompts without advancing.
pub fn step(
    state: BookingState,
    draft: &mut BookingDraft,
    input: &str,
    vocab: &Vocabulary,
) -> StepOutcome {
    if vocab.is_back(input) {
        return StepOutcome::cancelled();
    }

    match state {
        BookingState::SelectCategory => match vocab.detect_category(input) {
            Some(category) => {
                draft.category = Some(category);
                StepOutcome::next(name_prompt(), BookingState::CollectName)
            }
            None => StepOutcome::stay(
                "What would you like to book: a course or a studio session?",
            ),
        },
        BookingState::CollectName => {
            let name = sanitize(input, MAX_NAME_CHARS);
            if !valid_name(&name) {
                return StepOutcome::stay(
                    "Please enter your full name (at least 3 characters).",
                );
            }
            let reply = format!("Thanks {name}! What is your phone number?");
            draft.name = Some(name);
            StepOutcome::next(reply, BookingState::CollectPhone)
        }
        BookingState::CollectPhone => {
            let phone = sanitize(input, MAX_PHONE_CHARS);
            if !valid_phone(&phone) {
                return StepOutcome::stay(
                    "That does not look like a valid phone number. \
                     Please enter 10 to 15 digits, e.g. 01012345678.",
                );
            }
            let category = draft.category.unwrap_or(Category::Course);
            draft.phone = Some(phone);
            StepOutcome::next(details_prompt(category), BookingState::CollectDetails)
        }
        BookingState::CollectDetails => {
            let details = sanitize(input, MAX_DETAILS_CHARS);
            if details.is_empty() {
                return StepOutcome::stay("Please tell me which option you would like.");
            }
            draft.details = Some(details);
            StepOutcome::next(
                "When would suit you best? Free text is fine, \
                 e.g. \"next Thursday at 4pm\".",
                BookingState::CollectDate,
            )
        }
        BookingState::CollectDate => {
            // No structured date parsing: the preferred time is free text.
            draft.preferred_time = Some(sanitize(input, MAX_TIME_CHARS));
            StepOutcome::next(summary(draft), BookingState::Confirm)
        }
        BookingState::Confirm => match vocab.classify(input) {
            Trigger::Negative => StepOutcome::cancelled(),
            Trigger::Affirmative => StepOutcome {
                reply: None,
                transition: Transition::Idle,
                effect: StepEffect::Commit,
            },
            _ => StepOutcome::stay("Please reply yes to confirm or no to cancel."),
        },
    }
}

/// Drives the booking conversation: loads the session, runs one step,
/// interprets the effect and persists the new state.
pub struct BookingEngine {
    sessions: Arc<dyn SessionStore>,
    bookings: Arc<dyn BookingRepository>,
    notifier: Arc<dyn Notifier>,
    vocab: Arc<Vocabulary>,
}

impl BookingEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        bookings: Arc<dyn BookingRepository>,
        notifier: Arc<dyn Notifier>,
        vocab: Arc<Vocabulary>,
    ) -> Self {
        Self {
            sessions,
            bookings,
            notifier,
            vocab,
        }
    }

    /// Begin a booking conversation. When the triggering utterance already
    /// names a category unambiguously, `SelectCategory` is skipped.
    pub async fn start(&self, user_id: i64, utterance: &str) -> Result<String> {
        let mut session = self
            .sessions
            .get(user_id)
            .await?
            .unwrap_or_else(|| Session::new(user_id));
        session.draft = BookingDraft::default();

        let reply = match self.vocab.detect_category(utterance) {
            Some(category) => {
                session.draft.category = Some(category);
                session.mode = Mode::Booking(BookingState::CollectName);
                name_prompt()
            }
            None => {
                session.mode = Mode::Booking(BookingState::SelectCategory);
                "What would you like to book: a course or a studio session?".to_string()
            }
        };

        info!(user_id, mode = ?session.mode, "booking conversation started");
        self.sessions.save(session).await?;
        Ok(reply)
    }

    /// Handle one utterance of an in-progress booking conversation.
    pub async fn handle(&self, user_id: i64, utterance: &str) -> Result<String> {
        let mut session = self
            .sessions
            .get(user_id)
            .await?
            .unwrap_or_else(|| Session::new(user_id));

        let state = match session.mode {
            Mode::Booking(state) => state,
            // Not in a booking conversation; treat as a fresh start.
            _ => return self.start(user_id, utterance).await,
        };

        let outcome = step(state, &mut session.draft, utterance, &self.vocab);

        let reply = match outcome.effect {
            StepEffect::Commit => self.commit(&mut session).await,
            StepEffect::None => outcome.reply.unwrap_or_default(),
        };

        match outcome.transition {
            Transition::Stay => {}
            Transition::Next(next) => session.mode = Mode::Booking(next),
            Transition::Idle => {
                session.mode = Mode::Idle;
                session.draft = BookingDraft::default();
            }
        }
        self.sessions.save(session).await?;

        Ok(reply)
    }

    /// Persist the confirmed draft and arm the approval protocol with the
    /// new identifier. Storage failures are reported generically; the
    /// draft is not retried.
    async fn commit(&self, session: &mut Session) -> String {
        let new_booking = match to_new_booking(session.user_id, &session.draft) {
            Ok(b) => b,
            Err(e) => {
                error!(user_id = session.user_id, error = %e, "draft incomplete at commit");
                return commit_failure_reply();
            }
        };
        let category = new_booking.category;

        match self.bookings.create(new_booking.clone()).await {
            Ok(booking_id) => {
                info!(
                    user_id = session.user_id,
                    booking_id, "booking committed, notifying approver"
                );
                let note = format!(
                    "New booking request #{booking_id}\n\
                     Name: {}\n\
                     Phone: {}\n\
                     Type: {}\n\
                     Details: {}\n\
                     Preferred time: {}\n\
                     Requester id: {}",
                    new_booking.name,
                    new_booking.phone,
                    category.label(),
                    new_booking.details,
                    new_booking.preferred_time,
                    session.user_id,
                );
                if let Err(e) = self.notifier.notify_approver(&note).await {
                    // Best effort: the booking stands even if the approver
                    // message did not go out.
                    warn!(booking_id, error = %e, "failed to notify approver");
                }
                format!(
                    "Your {} request is in! Our team will contact you shortly to confirm.",
                    category.label()
                )
            }
            Err(e) => {
                error!(user_id = session.user_id, error = %e, "failed to save booking");
                commit_failure_reply()
            }
        }
    }
}

fn commit_failure_reply() -> String {
    "Something went wrong while saving your booking. \
     Please try again or contact us directly."
        .to_string()
}

fn to_new_booking(owner_id: i64, draft: &BookingDraft) -> Result<NewBooking> {
    Ok(NewBooking {
        owner_id,
        name: draft
            .name
            .clone()
            .ok_or(FlowError::IncompleteDraft("name"))?,
        phone: draft
            .phone
            .clone()
            .ok_or(FlowError::IncompleteDraft("phone"))?,
        category: draft.category.ok_or(FlowError::IncompleteDraft("category"))?,
        details: draft.details.clone().unwrap_or_default(),
        preferred_time: draft.preferred_time.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{BookingStatus, InMemoryBookingRepository};
    use crate::session::InMemorySessionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingNotifier {
        approver_notes: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                approver_notes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_user(&self, _user_id: i64, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn notify_approver(&self, text: &str) -> Result<()> {
            self.approver_notes.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FailingRepository;

    #[async_trait]
    impl BookingRepository for FailingRepository {
        async fn create(&self, _booking: NewBooking) -> Result<i64> {
            Err(FlowError::Repository("store unavailable".to_string()))
        }
        async fn get_by_id(&self, _id: i64) -> Result<Option<crate::booking::Booking>> {
            Ok(None)
        }
        async fn set_status(&self, _id: i64, _status: BookingStatus) -> Result<bool> {
            Ok(false)
        }
        async fn list_all(&self) -> Result<Vec<crate::booking::Booking>> {
            Ok(Vec::new())
        }
        async fn list_pending(&self) -> Result<Vec<crate::booking::Booking>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    struct Fixture {
        engine: BookingEngine,
        sessions: Arc<InMemorySessionStore>,
        bookings: Arc<InMemoryBookingRepository>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(InMemorySessionStore::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = BookingEngine::new(
            sessions.clone(),
            bookings.clone(),
            notifier.clone(),
            Arc::new(Vocabulary::default()),
        );
        Fixture {
            engine,
            sessions,
            bookings,
            notifier,
        }
    }

    async fn state_of(sessions: &InMemorySessionStore, user_id: i64) -> Mode {
        sessions.get(user_id).await.unwrap().unwrap().mode
    }

    #[test]
    fn name_validation_threshold() {
        assert!(!valid_name("Al"));
        assert!(valid_name("Ali"));
        assert!(!valid_name("  a  "));
    }

    #[test]
    fn phone_validation_rule() {
        assert!(valid_phone("010 123 45678"));
        assert!(valid_phone("+20 100 123 4567"));
        assert!(valid_phone("491701234567")); // international, 12 digits
        assert!(!valid_phone("123"));
        assert!(!valid_phone("0123456789012345")); // 16 digits
        assert!(!valid_phone("no digits here"));
    }

    #[tokio::test]
    async fn full_affirmative_run_creates_one_pending_booking() {
        let f = fixture();

        let reply = f.engine.start(10, "I want to reserve").await.unwrap();
        assert!(reply.contains("course or a studio session"));
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::SelectCategory)
        );

        f.engine.handle(10, "a course please").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::CollectName)
        );

        f.engine.handle(10, "Ali Hassan").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::CollectPhone)
        );

        f.engine.handle(10, "01012345678").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::CollectDetails)
        );

        f.engine.handle(10, "E-learning fundamentals").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::CollectDate)
        );

        let summary = f.engine.handle(10, "Thursday 4pm").await.unwrap();
        assert!(summary.contains("Ali Hassan"));
        assert_eq!(
            state_of(&f.sessions, 10).await,
            Mode::Booking(BookingState::Confirm)
        );

        let done = f.engine.handle(10, "yes").await.unwrap();
        assert!(done.contains("request is in"));
        assert_eq!(state_of(&f.sessions, 10).await, Mode::Idle);

        let all = f.bookings.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, BookingStatus::Pending);
        assert_eq!(all[0].owner_id, 10);
        assert_eq!(all[0].name, "Ali Hassan");

        let notes = f.notifier.approver_notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains(&format!("#{}", all[0].id)));
    }

    #[tokio::test]
    async fn category_in_trigger_skips_selection() {
        let f = fixture();
        let reply = f.engine.start(11, "book a studio shoot").await.unwrap();
        assert!(reply.contains("full name"));
        assert_eq!(
            state_of(&f.sessions, 11).await,
            Mode::Booking(BookingState::CollectName)
        );
        let session = f.sessions.get(11).await.unwrap().unwrap();
        assert_eq!(session.draft.category, Some(Category::StudioSession));
    }

    #[tokio::test]
    async fn invalid_inputs_reprompt_without_advancing() {
        let f = fixture();
        f.engine.start(12, "book a course").await.unwrap();

        f.engine.handle(12, "Al").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 12).await,
            Mode::Booking(BookingState::CollectName)
        );

        f.engine.handle(12, "Ali").await.unwrap();
        f.engine.handle(12, "123").await.unwrap();
        assert_eq!(
            state_of(&f.sessions, 12).await,
            Mode::Booking(BookingState::CollectPhone)
        );
    }

    #[tokio::test]
    async fn cancel_before_confirm_creates_nothing() {
        for cancel_at in 0..4usize {
            let f = fixture();
            f.engine.start(13, "book a course").await.unwrap();

            let inputs = ["Ali Hassan", "01012345678", "Teaching skills", "Sunday"];
            for input in inputs.iter().take(cancel_at) {
                f.engine.handle(13, input).await.unwrap();
            }

            let reply = f.engine.handle(13, "back").await.unwrap();
            assert!(reply.contains("cancelled"));
            assert_eq!(state_of(&f.sessions, 13).await, Mode::Idle);
            assert_eq!(f.bookings.count().await.unwrap(), 0);

            let session = f.sessions.get(13).await.unwrap().unwrap();
            assert!(session.draft.name.is_none());
        }
    }

    #[tokio::test]
    async fn negative_at_confirm_discards_draft() {
        let f = fixture();
        f.engine.start(14, "book a course").await.unwrap();
        for input in ["Ali Hassan", "01012345678", "Teaching skills", "Sunday"] {
            f.engine.handle(14, input).await.unwrap();
        }
        let reply = f.engine.handle(14, "no").await.unwrap();
        assert!(reply.contains("cancelled"));
        assert_eq!(f.bookings.count().await.unwrap(), 0);
        assert_eq!(state_of(&f.sessions, 14).await, Mode::Idle);
    }

    #[tokio::test]
    async fn ambiguous_confirm_reply_reprompts() {
        let f = fixture();
        f.engine.start(15, "book a course").await.unwrap();
        for input in ["Ali Hassan", "01012345678", "Teaching skills", "Sunday"] {
            f.engine.handle(15, input).await.unwrap();
        }
        let reply = f.engine.handle(15, "maybe").await.unwrap();
        assert!(reply.contains("yes to confirm"));
        assert_eq!(
            state_of(&f.sessions, 15).await,
            Mode::Booking(BookingState::Confirm)
        );
        assert_eq!(f.bookings.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_failure_reports_generic_error_and_goes_idle() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = BookingEngine::new(
            sessions.clone(),
            Arc::new(FailingRepository),
            notifier.clone(),
            Arc::new(Vocabulary::default()),
        );

        engine.start(16, "book a course").await.unwrap();
        for input in ["Ali Hassan", "01012345678", "Teaching skills", "Sunday"] {
            engine.handle(16, input).await.unwrap();
        }
        let reply = engine.handle(16, "yes").await.unwrap();
        assert!(reply.contains("Something went wrong"));
        assert!(!reply.contains("unavailable")); // no internal detail leaked
        assert_eq!(state_of(&sessions, 16).await, Mode::Idle);
        assert!(notifier.approver_notes.lock().unwrap().is_empty());
    }
}
