//! Error types for ingest-model

use thiserror::Error;

/// Model-level error kinds (validation of invariants, not I/O)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUnid,
    InvalidHash,
    InvalidValueKind,
    Truncated,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUnid => "invalid_unid",
            ErrorKind::InvalidHash => "invalid_hash",
            ErrorKind::InvalidValueKind => "invalid_value_kind",
            ErrorKind::Truncated => "truncated",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct ModelError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_unid(unid: impl Into<String>) -> Self {
        let unid = unid.into();
        Self::new(ErrorKind::InvalidUnid, format!("not a 32-hex UNID: {unid}"))
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
