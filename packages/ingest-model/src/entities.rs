//! Domain entities (§3 Data Model).
//!
//! Plain data, no I/O. Invariants that are cheap to check in-process are
//! exposed as `verify` helpers rather than enforced by the constructors,
//! since several (e.g. `has_attachments`) depend on sibling rows that
//! live in the sink, not on the struct itself.

use crate::unid::Unid;
use crate::value_kind::TypedValue;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A document-database source, addressed by server/path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub server_name: String,
    pub filepath: String,
    pub title: String,
    pub replica_id: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

/// Administrator-declared intent to ingest specific views from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionPlan {
    pub id: i64,
    pub server_name: String,
    pub filepath: String,
    pub enabled: bool,
}

/// One canonical view a plan wants extracted, plus an optional override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanView {
    pub id: i64,
    pub plan_id: i64,
    pub canonical_name: String,
    pub enabled: bool,
    pub regex_override: Option<String>,
    pub priority: i32,
}

/// A single upstream document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub unid: Unid,
    pub source_id: i64,
    pub note_id: Option<String>,
    pub form: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub modified_at: Option<NaiveDateTime>,
    pub has_attachments: bool,
    pub text_hash: Option<[u8; 32]>,
    pub text_body: String,
    pub doc_size_bytes: i64,
}

impl Document {
    /// `text_hash = SHA-256(utf8(text_body))` when `text_body` is non-empty,
    /// else `None`.
    pub fn compute_text_hash(text_body: &str) -> Option<[u8; 32]> {
        if text_body.is_empty() {
            None
        } else {
            let mut hasher = Sha256::new();
            hasher.update(text_body.as_bytes());
            Some(hasher.finalize().into())
        }
    }

    /// Invariant check: `text_hash` matches what `compute_text_hash` would
    /// produce for the document's own body.
    pub fn text_hash_is_consistent(&self) -> bool {
        self.text_hash == Self::compute_text_hash(&self.text_body)
    }

    pub fn truncate_subject(subject: &str) -> String {
        truncate_chars(subject, 1024)
    }

    pub fn truncate_form(form: &str) -> String {
        truncate_chars(form, 256)
    }

    pub fn truncate_author(author: &str) -> String {
        truncate_chars(author, 512)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Catalog of attribute names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name_lower: String,
    /// `Some(1)` ⇒ store values for this item. See §4.5 and §9's Open
    /// Question on unknown-item default policy.
    pub notes_filter: Option<i32>,
}

/// What to do for an item name that has no catalog row at all.
///
/// §9 documents the source's inconsistent default; the implementation
/// MUST pick one explicitly rather than guess. This crate defaults to
/// `Store` (matching `extract-prod.py`'s behavior), configurable by the
/// orchestrator caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownItemPolicy {
    Store,
    Skip,
}

impl Item {
    /// Whether values for this item name should be stored, given the
    /// policy for items absent from the catalog entirely.
    pub fn should_store(found: Option<&Item>, unknown_policy: UnknownItemPolicy) -> bool {
        match found {
            Some(item) => item.notes_filter == Some(1),
            None => matches!(unknown_policy, UnknownItemPolicy::Store),
        }
    }
}

/// Globally deduplicated value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemValue {
    pub id: i64,
    pub item_id: i64,
    pub value: TypedValue,
    pub val_hash: [u8; 32],
    pub attachment_id: Option<i64>,
}

impl ItemValue {
    pub fn new(item_id: i64, value: TypedValue, attachment_id: Option<i64>) -> (Self, [u8; 32]) {
        let val_hash = value.val_hash(item_id);
        (
            Self {
                id: 0,
                item_id,
                value,
                val_hash,
                attachment_id,
            },
            val_hash,
        )
    }
}

/// Linker (unid, item_id, val_order) → item_value_id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocItemValue {
    pub unid: Unid,
    pub item_id: i64,
    pub val_order: i32,
    pub item_value_id: i64,
    pub is_summary: bool,
}

/// Binary attachment kind. `1452`/`1453`/`1454` are the upstream's native
/// object-type constants for image/OLE/attachment embedded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    Attachment,
    Image,
    Ole,
    Object,
}

impl AttachmentKind {
    /// Map a native embedded-object type constant, if recognized.
    pub fn from_object_type(type_code: i32) -> Option<Self> {
        match type_code {
            1452 => Some(AttachmentKind::Image),
            1453 => Some(AttachmentKind::Ole),
            1454 => Some(AttachmentKind::Attachment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub unid: Unid,
    pub filename: String,
    pub sha256: [u8; 32],
    pub item_name: String,
    pub kind: AttachmentKind,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// (unid, view_name, category_path) membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    pub unid: Unid,
    pub view_name: String,
    pub category_path: String,
    pub leaf_category: String,
}

impl DocumentView {
    /// Canonicalize a raw, possibly messy, category path: split on `\`,
    /// trim each component, drop empties, rejoin with `\`.
    pub fn canonicalize_category_path(raw: &str) -> String {
        raw.split('\\')
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\\")
    }

    pub fn leaf_of(category_path: &str) -> String {
        category_path
            .split('\\')
            .last()
            .filter(|c| !c.is_empty())
            .unwrap_or("Unnamed")
            .to_string()
    }
}

/// Durable progress marker for a (plan, source, view) snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlCheckpoint {
    pub plan_id: i64,
    pub source_id: i64,
    pub view_name: String,
    pub snapshot_sig: String,
    pub next_index: i64,
    pub last_unid: Option<Unid>,
    pub updated_at: DateTime<Utc>,
}

/// Per-source run record with counters, carried to completion even on
/// failure (§7: "the ETL run record is finalized with counters even on
/// failure").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlRun {
    pub id: i64,
    pub source_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub scanned: i64,
    pub upserted: i64,
    pub atts: i64,
    pub errors: i64,
}

impl EtlRun {
    pub fn start(source_id: i64) -> Self {
        Self {
            id: 0,
            source_id,
            started_at: Utc::now(),
            ended_at: None,
            scanned: 0,
            upserted: 0,
            atts: 0,
            errors: 0,
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

/// Identity-directory user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub user_principal_name: String,
    pub mail_nickname: String,
    pub mail: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub reports: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_hash_none_when_empty() {
        assert_eq!(Document::compute_text_hash(""), None);
    }

    #[test]
    fn text_hash_some_when_nonempty() {
        assert!(Document::compute_text_hash("hello").is_some());
    }

    #[test]
    fn category_path_canonicalizes() {
        let raw = " Finance \\\\  Invoices \\ ";
        assert_eq!(
            DocumentView::canonicalize_category_path(raw),
            "Finance\\Invoices"
        );
    }

    #[test]
    fn leaf_of_takes_last_component() {
        assert_eq!(DocumentView::leaf_of("Finance\\Invoices"), "Invoices");
    }

    #[test]
    fn leaf_of_empty_path_is_unnamed() {
        assert_eq!(DocumentView::leaf_of(""), "Unnamed");
    }

    #[test]
    fn should_store_unknown_defaults_to_policy() {
        assert!(Item::should_store(None, UnknownItemPolicy::Store));
        assert!(!Item::should_store(None, UnknownItemPolicy::Skip));
    }

    #[test]
    fn should_store_known_item_requires_filter_eq_1() {
        let item = Item {
            id: 1,
            name_lower: "subject".into(),
            notes_filter: Some(1),
        };
        assert!(Item::should_store(Some(&item), UnknownItemPolicy::Skip));

        let item = Item {
            id: 2,
            name_lower: "internalnote".into(),
            notes_filter: Some(0),
        };
        assert!(!Item::should_store(Some(&item), UnknownItemPolicy::Store));
    }

    #[test]
    fn attachment_kind_maps_known_codes() {
        assert_eq!(
            AttachmentKind::from_object_type(1452),
            Some(AttachmentKind::Image)
        );
        assert_eq!(
            AttachmentKind::from_object_type(1453),
            Some(AttachmentKind::Ole)
        );
        assert_eq!(
            AttachmentKind::from_object_type(1454),
            Some(AttachmentKind::Attachment)
        );
        assert_eq!(AttachmentKind::from_object_type(9999), None);
    }
}
