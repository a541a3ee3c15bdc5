//! Resilient capability-object bridge to the upstream document database.

pub mod bridge;
pub mod error;
pub mod retry;
pub mod transient;

pub use bridge::{ObjectBridge, RawAttachment, RawDocument, RawItemReading, ResilientBridge, ViewEntry};
pub use error::{BridgeError, ErrorCategory, Result};
pub use retry::{retry, retry_with_reopen, BackoffPolicy};
pub use transient::{classify, is_transient};
