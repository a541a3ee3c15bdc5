//! The upstream document database's universal identifier.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-hex-character universal identifier of an upstream document.
///
/// Unique within a [`crate::entities::Source`]; never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Unid(String);

impl Unid {
    /// Validate and wrap a raw string as a `Unid`.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(raw.to_ascii_uppercase()))
        } else {
            Err(ModelError::invalid_unid(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Unid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
