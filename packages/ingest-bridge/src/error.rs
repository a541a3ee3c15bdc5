use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("reopen failed: {0}")]
    ReopenFailed(String),

    #[error("view not found: {0}")]
    ViewNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn protocol<E: std::fmt::Display>(e: E) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Error category for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient: connection drop, reopen, lock conflict. Retry with backoff.
    Transient,
    /// Permanent: bad input, missing object. Don't retry.
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
