use std::time::Duration;

use thiserror::Error;

/// Faults raised by a browser session (the automation layer underneath the core).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrowserError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("browser session error: {0}")]
    Session(String),
    #[error("script error: {0}")]
    Script(String),
}

/// Everything that can end a booking job. None of these escape the job:
/// they are turned into a `BookingResult::Failure` at the job boundary.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("navigation to {target} did not settle: {reason}")]
    NavigationTimeout { target: String, reason: String },

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("no free {duration_hours}h window starting at {start} between {earliest} and {latest}")]
    SlotNotFound {
        start: String,
        duration_hours: f64,
        earliest: String,
        latest: String,
    },

    #[error("end time {0} is not offered by the booking form")]
    EndTimeUnavailable(String),

    #[error("player selection exhausted: {0}")]
    PlayerSelectionExhausted(String),

    #[error("organizer {0} is blocked by the site, booking cancelled")]
    OrganizerBlocked(String),

    #[error("unrecognized booking rejection: {0}")]
    UnrecognizedRejection(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("a booking is already running")]
    AlreadyRunning,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BookingError {
    pub fn navigation(target: impl ToString, reason: impl Into<String>) -> Self {
        BookingError::NavigationTimeout {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}
