use crate::booking::Category;

/// Signals recognized inside an active conversation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Category(Category),
    Affirmative,
    Negative,
    Back,
    None,
}

/// Top-level intents recognized when no conversation is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    StartBooking(Option<Category>),
    StartChat,
    ShowCourses,
    ShowStudio,
    Contact,
    Other,
}

/// The phrase sets driving classification. Matching is case-insensitive
/// substring containment, so button captions and typed variants both hit.
///
/// The vocabulary is plain data: swapping phrases never requires touching
/// the state machine.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    pub affirmative: Vec<String>,
    pub negative: Vec<String>,
    pub back: Vec<String>,
    pub course: Vec<String>,
    pub studio: Vec<String>,
    pub booking: Vec<String>,
    pub chat: Vec<String>,
    pub courses_info: Vec<String>,
    pub studio_info: Vec<String>,
    pub contact: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        }
        Self {
            affirmative: words(&["yes", "confirm", "sure", "correct", "ok", "yep", "✅"]),
            negative: words(&["no", "cancel", "nope", "don't want", "❌"]),
            back: words(&["back", "main menu", "home", "exit", "🏠"]),
            course: words(&["course", "class", "lesson"]),
            studio: words(&["studio", "shoot", "photo", "session", "recording"]),
            booking: words(&["book", "reserve", "appointment", "reservation"]),
            chat: words(&["ask", "question", "chat"]),
            courses_info: words(&["our courses", "course list", "what courses"]),
            studio_info: words(&["studio packages", "package list", "studio prices"]),
            contact: words(&["contact", "phone number", "address", "reach you"]),
        }
    }
}

impl Vocabulary {
    fn matches(list: &[String], text: &str) -> bool {
        list.iter().any(|word| text.contains(word.as_str()))
    }

    pub fn is_affirmative(&self, text: &str) -> bool {
        Self::matches(&self.affirmative, &text.to_lowercase())
    }

    pub fn is_negative(&self, text: &str) -> bool {
        Self::matches(&self.negative, &text.to_lowercase())
    }

    pub fn is_back(&self, text: &str) -> bool {
        Self::matches(&self.back, &text.to_lowercase())
    }

    pub fn detect_category(&self, text: &str) -> Option<Category> {
        let text = text.to_lowercase();
        if Self::matches(&self.course, &text) {
            Some(Category::Course)
        } else if Self::matches(&self.studio, &text) {
            Some(Category::StudioSession)
        } else {
            None
        }
    }

    /// Classify a mid-conversation utterance.
    ///
    /// Precedence is fixed: back, then negative, then affirmative, then
    /// category. An utterance matching both the negative and affirmative
    /// sets therefore cancels rather than confirms; a booking should not be
    /// committed on ambiguous input.
    pub fn classify(&self, text: &str) -> Trigger {
        if self.is_back(text) {
            Trigger::Back
        } else if self.is_negative(text) {
            Trigger::Negative
        } else if self.is_affirmative(text) {
            Trigger::Affirmative
        } else if let Some(category) = self.detect_category(text) {
            Trigger::Category(category)
        } else {
            Trigger::None
        }
    }

    /// Classify an utterance arriving outside any conversation.
    pub fn route(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase();
        if Self::matches(&self.booking, &lowered) {
            Intent::StartBooking(self.detect_category(&lowered))
        } else if Self::matches(&self.courses_info, &lowered) {
            Intent::ShowCourses
        } else if Self::matches(&self.studio_info, &lowered) {
            Intent::ShowStudio
        } else if Self::matches(&self.contact, &lowered) {
            Intent::Contact
        } else if Self::matches(&self.chat, &lowered) {
            Intent::StartChat
        } else {
            Intent::Other
        }
    }
}
