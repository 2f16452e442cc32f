use thiserror::Error;

/// Recoverable protocol errors, reported back to the originating session as
/// an `error` event. None of these terminate the connection or the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("session has not completed setup")]
    Unauthenticated,
    #[error("session is already bound to a different participant")]
    AlreadyBound,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("not permitted for this party")]
    Forbidden,
    #[error("recipient has no live session")]
    RecipientOffline,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("rate limited, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl RelayError {
    /// Stable machine-readable code carried in the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated => "UNAUTHENTICATED",
            RelayError::AlreadyBound => "ALREADY_BOUND",
            RelayError::InvalidState(_) => "INVALID_STATE",
            RelayError::Forbidden => "FORBIDDEN",
            RelayError::RecipientOffline => "RECIPIENT_OFFLINE",
            RelayError::BadRequest(_) => "BAD_REQUEST",
            RelayError::RateLimited { .. } => "RATE_LIMITED",
        }
    }
}
