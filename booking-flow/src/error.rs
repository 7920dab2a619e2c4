use thiserror::Error;

/// Errors surfaced by the conversation and storage layers.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("invalid booking status: {0}")]
    InvalidStatus(String),

    #[error("booking not found: {0}")]
    BookingNotFound(i64),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("incomplete draft: missing {0}")]
    IncompleteDraft(&'static str),
}

pub type Result<T> = std::result::Result<T, FlowError>;
