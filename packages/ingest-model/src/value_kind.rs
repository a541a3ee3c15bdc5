//! Tagged value classification for item values.
//!
//! Per the design note: dispatch classification by variant, not by runtime
//! type checks against an upstream dynamically-typed value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The classified, normalized value carried by an [`crate::entities::ItemValue`].
///
/// Each variant corresponds to exactly one `val_kind` string and exactly one
/// typed column in the SQL sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    String(String),
    /// Long string split in two: the first 1024 chars (`v_string`) and the
    /// full text (`v_text`). Carried together because both columns are
    /// populated from a single logical value.
    Text { head: String, full: String },
    RichText { head: String, full: String },
    Number(f64),
    Datetime(chrono::NaiveDateTime),
    Bool(bool),
    Bytes(Vec<u8>),
    Unknown,
}

impl TypedValue {
    pub fn kind_str(&self) -> &'static str {
        match self {
            TypedValue::String(_) => "string",
            TypedValue::Text { .. } => "text",
            TypedValue::RichText { .. } => "richtext",
            TypedValue::Number(_) => "number",
            TypedValue::Datetime(_) => "datetime",
            TypedValue::Bool(_) => "bool",
            TypedValue::Bytes(_) => "bytes",
            TypedValue::Unknown => "unknown",
        }
    }

    /// Canonical normalized-fields hash input, per §3:
    /// `val_hash = SHA-256(item_id ‖ 0x1F ‖ kind ‖ 0x1F ‖ normalized-fields)`
    /// with datetime normalized to `YYYY-MM-DD HH:MM:SS`.
    pub fn val_hash(&self, item_id: i64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(item_id.to_le_bytes());
        hasher.update([0x1F]);
        hasher.update(self.kind_str().as_bytes());
        hasher.update([0x1F]);
        match self {
            TypedValue::String(s) => hasher.update(s.as_bytes()),
            TypedValue::Text { full, .. } => hasher.update(full.as_bytes()),
            TypedValue::RichText { full, .. } => hasher.update(full.as_bytes()),
            TypedValue::Number(n) => hasher.update(n.to_bits().to_le_bytes()),
            TypedValue::Datetime(dt) => {
                hasher.update(dt.format("%Y-%m-%d %H:%M:%S").to_string().as_bytes())
            }
            TypedValue::Bool(b) => hasher.update([*b as u8]),
            TypedValue::Bytes(b) => hasher.update(b),
            TypedValue::Unknown => hasher.update(b"\0"),
        }
        hasher.finalize().into()
    }

    /// Classify a raw, already-typed item reading into a `TypedValue`.
    ///
    /// `is_rich` marks items the bridge reports as rich-text (see
    /// DESIGN.md's note on the rich-text heuristic).
    pub fn classify_string(s: &str, is_rich: bool) -> Self {
        const MAX_SHORT: usize = 1024;
        if s.chars().count() <= MAX_SHORT {
            if is_rich {
                TypedValue::RichText {
                    head: s.to_string(),
                    full: s.to_string(),
                }
            } else {
                TypedValue::String(s.to_string())
            }
        } else {
            let head: String = s.chars().take(MAX_SHORT).collect();
            if is_rich {
                TypedValue::RichText {
                    head,
                    full: s.to_string(),
                }
            } else {
                TypedValue::Text {
                    head,
                    full: s.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let v = TypedValue::String("hello".into());
        assert_eq!(v.val_hash(7), v.val_hash(7));
    }

    #[test]
    fn hash_differs_by_item_id() {
        let v = TypedValue::String("hello".into());
        assert_ne!(v.val_hash(7), v.val_hash(8));
    }

    #[test]
    fn datetime_normalizes_format() {
        use chrono::NaiveDate;
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let v = TypedValue::Datetime(dt);
        assert_eq!(v.kind_str(), "datetime");
    }

    #[test]
    fn classify_short_string() {
        let v = TypedValue::classify_string("hi", false);
        assert!(matches!(v, TypedValue::String(_)));
    }

    #[test]
    fn classify_long_string_splits() {
        let long = "x".repeat(2000);
        let v = TypedValue::classify_string(&long, false);
        match v {
            TypedValue::Text { head, full } => {
                assert_eq!(head.len(), 1024);
                assert_eq!(full.len(), 2000);
            }
            _ => panic!("expected Text"),
        }
    }

    #[test]
    fn classify_rich_text_always_richtext_kind() {
        let v = TypedValue::classify_string("short", true);
        assert_eq!(v.kind_str(), "richtext");
    }
}
