use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("model error: {0}")]
    Model(#[from] ingest_model::ModelError),

    #[error("bridge error: {0}")]
    Bridge(#[from] ingest_bridge::BridgeError),

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("plan not found: {0}")]
    PlanNotFound(i64),

    #[error("no matching view found for canonical name: {0}")]
    ViewNotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

/// Error category for run-retry logic, mirrored from the bridge's
/// transient/permanent split so the run state machine doesn't need to
/// know about bridge internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
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

impl From<ingest_bridge::ErrorCategory> for ErrorCategory {
    fn from(c: ingest_bridge::ErrorCategory) -> Self {
        match c {
            ingest_bridge::ErrorCategory::Transient => ErrorCategory::Transient,
            ingest_bridge::ErrorCategory::Permanent => ErrorCategory::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_display() {
        assert_eq!(ErrorCategory::Transient.to_string(), "transient");
        assert_eq!(ErrorCategory::Permanent.to_string(), "permanent");
    }
}
