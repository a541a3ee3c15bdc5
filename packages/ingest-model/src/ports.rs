//! Storage and content-addressing ports.
//!
//! Mirrors the shape of a snapshot-store port trait: a narrow async
//! interface the orchestration layer programs against, with a concrete
//! sqlite-backed implementation living in `ingest-storage`.

use crate::entities::{
    Attachment, Document, DocumentView, EtlCheckpoint, EtlRun, IngestionPlan, Item, ItemValue,
    PlanView, Source, User,
};
use crate::error::Result;
use crate::unid::Unid;
use crate::value_kind::TypedValue;
use async_trait::async_trait;
use std::path::Path;

/// Outcome of upserting a document plus its item values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    pub document_inserted: bool,
    pub document_updated: bool,
    pub values_inserted: u32,
    pub values_reused: u32,
    pub attachments_stored: u32,
}

/// A single item-value row to write as part of a [`PreparedDocument`].
///
/// `attachment_filename` carries `$FILE` linkage as a name to resolve
/// against the document's own `attachments` once their rows exist,
/// rather than an id computed ahead of time — the attachment ids aren't
/// known until [`DocumentSink::commit_batch`] has written those rows.
#[derive(Debug, Clone)]
pub struct PreparedItemValue {
    pub value: TypedValue,
    pub attachment_filename: Option<String>,
}

/// One item's resolved value writes for a single document.
#[derive(Debug, Clone)]
pub struct PreparedItemWrite {
    pub item_id: i64,
    pub values: Vec<PreparedItemValue>,
}

/// Everything [`DocumentSink::commit_batch`] needs to write for one
/// document, with item and attachment lookups already resolved so
/// applying it needs no further round trips beyond the SQL statements
/// themselves.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document: Document,
    pub attachments: Vec<Attachment>,
    pub item_writes: Vec<PreparedItemWrite>,
    pub view: DocumentView,
}

/// Sink for documents, item values, attachments, and view memberships.
///
/// Implementations must make `upsert_document` idempotent: calling it
/// twice with identical input produces identical stored state and the
/// second call's `UpsertOutcome` reports no new inserts.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn get_or_create_source(
        &self,
        server_name: &str,
        filepath: &str,
        title: &str,
    ) -> Result<Source>;

    async fn get_or_create_item(&self, name_lower: &str) -> Result<Item>;

    async fn find_item(&self, name_lower: &str) -> Result<Option<Item>>;

    /// Insert `document` if absent, else update mutable fields in place.
    async fn upsert_document(&self, document: &Document) -> Result<UpsertOutcome>;

    /// Deduplicated insert-or-reuse of a single value row, keyed on
    /// `(item_id, val_hash)` with three-valued-null-safe comparison of
    /// the normalized fields.
    async fn upsert_item_value(&self, value: &ItemValue) -> Result<(i64, bool)>;

    /// Replace the (unid, item_id) slice of doc_item_value rows with
    /// exactly the given ordered set, linking to already-upserted
    /// item_value ids.
    async fn replace_doc_item_values(
        &self,
        unid: &Unid,
        item_id: i64,
        item_value_ids: &[(i32, i64, bool)],
    ) -> Result<()>;

    async fn upsert_attachment(&self, attachment: &Attachment) -> Result<i64>;

    async fn set_document_views(&self, unid: &Unid, views: &[DocumentView]) -> Result<()>;

    async fn count_attachments(&self, unid: &Unid) -> Result<u32>;

    /// Write every prepared document in `documents` plus `checkpoint`'s
    /// advance as a single transaction: either all of it is durable, or
    /// none of it is. Advancing the checkpoint without its batch (or the
    /// reverse) must never be observable (§4.4/§5).
    async fn commit_batch(
        &self,
        documents: &[PreparedDocument],
        checkpoint: &EtlCheckpoint,
    ) -> Result<Vec<UpsertOutcome>>;

    async fn load_checkpoint(
        &self,
        plan_id: i64,
        source_id: i64,
        view_name: &str,
    ) -> Result<Option<EtlCheckpoint>>;

    async fn save_checkpoint(&self, checkpoint: &EtlCheckpoint) -> Result<()>;

    async fn start_run(&self, run: &EtlRun) -> Result<i64>;

    async fn finish_run(&self, run: &EtlRun) -> Result<()>;

    async fn list_plans(&self) -> Result<Vec<IngestionPlan>>;

    async fn list_plan_views(&self, plan_id: i64) -> Result<Vec<PlanView>>;

    async fn upsert_user(&self, user: &User) -> Result<()>;
}

/// Content-addressed binary store keyed by the sha256 of the content.
///
/// `put` must be safe to call concurrently with identical content:
/// implementations write to a temp path and rename into place, so two
/// writers racing on the same hash both succeed and agree on the final
/// path.
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store the file at `local_path`, streaming it in bounded-size
    /// chunks rather than buffering it whole, and return its content
    /// hash, the path it was stored under (relative to the store root),
    /// and its size in bytes.
    async fn put(&self, local_path: &Path) -> Result<([u8; 32], String, u64)>;

    async fn get(&self, hash: &[u8; 32]) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, hash: &[u8; 32]) -> Result<bool>;

    /// Relative path a given hash would be stored under, independent of
    /// whether it's actually present.
    fn path_for(&self, hash: &[u8; 32]) -> String;
}
