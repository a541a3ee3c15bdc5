//! `SqliteDocumentSink`: the concrete [`DocumentSink`] backing the
//! orchestrator.
//!
//! Item-value dedup looks up `(item_id, val_hash)` rather than comparing
//! each nullable typed column directly: `val_hash` already folds every
//! typed column plus `val_kind` through the three-valued-null-safe
//! normalization `TypedValue::val_hash` performs (equal hash implies
//! equal columns), so the lookup needs no `(a = b OR (a IS NULL AND b
//! IS NULL))` spelling here. SQLite has no `IS NOT DISTINCT FROM`; a
//! sink over a dialect that stores typed columns without a precomputed
//! hash would need that expanded form instead.

use async_trait::async_trait;
use chrono::Utc;
use ingest_model::{
    Attachment, AttachmentKind, Document, DocumentSink, DocumentView, EtlCheckpoint, EtlRun,
    IngestionPlan, Item, ItemValue, ModelError, PlanView, PreparedDocument, Source, TypedValue,
    Unid, UpsertOutcome, User,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::warn;

fn to_model_err(e: sqlx::Error) -> ModelError {
    crate::error::StorageError::from(e).into()
}

/// Insert-or-update `document`, keyed on `unid`, against whatever
/// connection `conn` is — a pooled connection for a standalone call, or
/// the shared connection of an outer transaction for [`commit_batch`].
async fn upsert_document_tx(
    conn: &mut SqliteConnection,
    document: &Document,
) -> ingest_model::Result<UpsertOutcome> {
    let existing = sqlx::query("SELECT unid FROM document WHERE unid = ?")
        .bind(document.unid.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(to_model_err)?;

    let text_hash = document.text_hash.map(|h| h.to_vec());

    if existing.is_some() {
        sqlx::query(
            "UPDATE document SET note_id = ?, form = ?, subject = ?, author = ?, \
             created_at = ?, modified_at = ?, has_attachments = ?, text_hash = ?, \
             text_body = ?, doc_size_bytes = ? WHERE unid = ?",
        )
        .bind(&document.note_id)
        .bind(&document.form)
        .bind(&document.subject)
        .bind(&document.author)
        .bind(document.created_at.map(|d| d.to_string()))
        .bind(document.modified_at.map(|d| d.to_string()))
        .bind(document.has_attachments as i64)
        .bind(text_hash)
        .bind(&document.text_body)
        .bind(document.doc_size_bytes)
        .bind(document.unid.as_str())
        .execute(&mut *conn)
        .await
        .map_err(to_model_err)?;

        Ok(UpsertOutcome {
            document_inserted: false,
            document_updated: true,
            ..Default::default()
        })
    } else {
        sqlx::query(
            "INSERT INTO document (unid, source_id, note_id, form, subject, author, \
             created_at, modified_at, has_attachments, text_hash, text_body, doc_size_bytes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(document.unid.as_str())
        .bind(document.source_id)
        .bind(&document.note_id)
        .bind(&document.form)
        .bind(&document.subject)
        .bind(&document.author)
        .bind(document.created_at.map(|d| d.to_string()))
        .bind(document.modified_at.map(|d| d.to_string()))
        .bind(document.has_attachments as i64)
        .bind(text_hash)
        .bind(&document.text_body)
        .bind(document.doc_size_bytes)
        .execute(&mut *conn)
        .await
        .map_err(to_model_err)?;

        Ok(UpsertOutcome {
            document_inserted: true,
            document_updated: false,
            ..Default::default()
        })
    }
}

fn typed_value_columns(
    value: &TypedValue,
) -> (
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<String>,
    Option<i64>,
    Option<Vec<u8>>,
) {
    match value {
        TypedValue::String(s) => (Some(s.clone()), None, None, None, None, None),
        TypedValue::Text { head, full } => (Some(head.clone()), Some(full.clone()), None, None, None, None),
        TypedValue::RichText { head, full } => (Some(head.clone()), Some(full.clone()), None, None, None, None),
        TypedValue::Number(n) => (None, None, Some(*n), None, None, None),
        TypedValue::Datetime(dt) => (
            None,
            None,
            None,
            Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            None,
            None,
        ),
        TypedValue::Bool(b) => (None, None, None, None, Some(*b as i64), None),
        TypedValue::Bytes(b) => (None, None, None, None, None, Some(b.clone())),
        TypedValue::Unknown => (None, None, None, None, None, None),
    }
}

async fn upsert_item_value_tx(
    conn: &mut SqliteConnection,
    value: &ItemValue,
) -> ingest_model::Result<(i64, bool)> {
    if let Some(row) = sqlx::query("SELECT id FROM item_value WHERE item_id = ? AND val_hash = ?")
        .bind(value.item_id)
        .bind(value.val_hash.to_vec())
        .fetch_optional(&mut *conn)
        .await
        .map_err(to_model_err)?
    {
        return Ok((row.get("id"), false));
    }

    let kind = value.value.kind_str();
    let (v_string, v_text, v_number, v_datetime, v_bool, v_bytes) = typed_value_columns(&value.value);

    let result = sqlx::query(
        "INSERT INTO item_value \
         (item_id, val_kind, val_hash, v_string, v_text, v_number, v_datetime, v_bool, v_bytes, attachment_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(item_id, val_hash) DO NOTHING",
    )
    .bind(value.item_id)
    .bind(kind)
    .bind(value.val_hash.to_vec())
    .bind(v_string)
    .bind(v_text)
    .bind(v_number)
    .bind(v_datetime)
    .bind(v_bool)
    .bind(v_bytes)
    .bind(value.attachment_id)
    .execute(&mut *conn)
    .await
    .map_err(to_model_err)?;

    if result.rows_affected() == 1 {
        return Ok((result.last_insert_rowid(), true));
    }

    // A concurrent writer beat us to it (unique-violation-as-hint race).
    let row = sqlx::query("SELECT id FROM item_value WHERE item_id = ? AND val_hash = ?")
        .bind(value.item_id)
        .bind(value.val_hash.to_vec())
        .fetch_one(&mut *conn)
        .await
        .map_err(to_model_err)?;
    Ok((row.get("id"), false))
}

async fn replace_doc_item_values_tx(
    conn: &mut SqliteConnection,
    unid: &Unid,
    item_id: i64,
    item_value_ids: &[(i32, i64, bool)],
) -> ingest_model::Result<()> {
    sqlx::query("DELETE FROM doc_item_value WHERE unid = ? AND item_id = ?")
        .bind(unid.as_str())
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(to_model_err)?;

    for (val_order, item_value_id, is_summary) in item_value_ids {
        sqlx::query(
            "INSERT INTO doc_item_value (unid, item_id, val_order, item_value_id, is_summary) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(unid.as_str())
        .bind(item_id)
        .bind(val_order)
        .bind(item_value_id)
        .bind(*is_summary as i64)
        .execute(&mut *conn)
        .await
        .map_err(to_model_err)?;
    }

    Ok(())
}

fn kind_str(kind: AttachmentKind) -> &'static str {
    match kind {
        AttachmentKind::Attachment => "attachment",
        AttachmentKind::Image => "image",
        AttachmentKind::Ole => "ole",
        AttachmentKind::Object => "object",
    }
}

async fn upsert_attachment_tx(
    conn: &mut SqliteConnection,
    attachment: &Attachment,
) -> ingest_model::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO attachment \
         (unid, filename, sha256, item_name, kind, mime_type, size_bytes, storage_path, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(unid, filename, sha256) DO NOTHING",
    )
    .bind(attachment.unid.as_str())
    .bind(&attachment.filename)
    .bind(attachment.sha256.to_vec())
    .bind(&attachment.item_name)
    .bind(kind_str(attachment.kind))
    .bind(&attachment.mime_type)
    .bind(attachment.size_bytes)
    .bind(&attachment.storage_path)
    .bind(attachment.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(to_model_err)?;

    if result.rows_affected() == 1 {
        return Ok(result.last_insert_rowid());
    }

    // A concurrent writer beat us to it (unique-violation-as-hint race).
    let row = sqlx::query("SELECT id FROM attachment WHERE unid = ? AND filename = ? AND sha256 = ?")
        .bind(attachment.unid.as_str())
        .bind(&attachment.filename)
        .bind(attachment.sha256.to_vec())
        .fetch_one(&mut *conn)
        .await
        .map_err(to_model_err)?;
    Ok(row.get("id"))
}

async fn set_document_view_tx(
    conn: &mut SqliteConnection,
    view: &DocumentView,
) -> ingest_model::Result<()> {
    sqlx::query(
        "INSERT INTO document_view (unid, view_name, category_path, leaf_category) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(unid, view_name, category_path) DO UPDATE SET \
         leaf_category = excluded.leaf_category",
    )
    .bind(view.unid.as_str())
    .bind(&view.view_name)
    .bind(&view.category_path)
    .bind(&view.leaf_category)
    .execute(&mut *conn)
    .await
    .map_err(to_model_err)?;
    Ok(())
}

async fn save_checkpoint_tx(
    conn: &mut SqliteConnection,
    checkpoint: &EtlCheckpoint,
) -> ingest_model::Result<()> {
    sqlx::query(
        "INSERT INTO etl_checkpoint \
         (plan_id, source_id, view_name, snapshot_sig, next_index, last_unid, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(plan_id, source_id, view_name) DO UPDATE SET \
         snapshot_sig = excluded.snapshot_sig, next_index = excluded.next_index, \
         last_unid = excluded.last_unid, updated_at = excluded.updated_at",
    )
    .bind(checkpoint.plan_id)
    .bind(checkpoint.source_id)
    .bind(&checkpoint.view_name)
    .bind(&checkpoint.snapshot_sig)
    .bind(checkpoint.next_index)
    .bind(checkpoint.last_unid.as_ref().map(|u| u.as_str().to_string()))
    .bind(checkpoint.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(to_model_err)?;
    Ok(())
}

pub struct SqliteDocumentSink {
    pool: SqlitePool,
}

impl SqliteDocumentSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> crate::error::Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        crate::sqlite::schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DocumentSink for SqliteDocumentSink {
    async fn get_or_create_source(
        &self,
        server_name: &str,
        filepath: &str,
        title: &str,
    ) -> ingest_model::Result<Source> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO source (server_name, filepath, title, last_seen_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(server_name, filepath) DO UPDATE SET \
             title = excluded.title, last_seen_at = excluded.last_seen_at",
        )
        .bind(server_name)
        .bind(filepath)
        .bind(title)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(to_model_err)?;

        let row = sqlx::query(
            "SELECT id, server_name, filepath, title, replica_id, last_seen_at \
             FROM source WHERE server_name = ? AND filepath = ?",
        )
        .bind(server_name)
        .bind(filepath)
        .fetch_one(&self.pool)
        .await
        .map_err(to_model_err)?;

        Ok(Source {
            id: row.get("id"),
            server_name: row.get("server_name"),
            filepath: row.get("filepath"),
            title: row.get("title"),
            replica_id: row.get("replica_id"),
            last_seen_at: chrono::DateTime::parse_from_rfc3339(row.get("last_seen_at"))
                .map_err(|e| ModelError::new(ingest_model::ErrorKind::Truncated, e.to_string()))?
                .with_timezone(&Utc),
        })
    }

    async fn get_or_create_item(&self, name_lower: &str) -> ingest_model::Result<Item> {
        sqlx::query("INSERT OR IGNORE INTO item (name_lower) VALUES (?)")
            .bind(name_lower)
            .execute(&self.pool)
            .await
            .map_err(to_model_err)?;

        let row = sqlx::query("SELECT id, name_lower, notes_filter FROM item WHERE name_lower = ?")
            .bind(name_lower)
            .fetch_one(&self.pool)
            .await
            .map_err(to_model_err)?;

        Ok(Item {
            id: row.get("id"),
            name_lower: row.get("name_lower"),
            notes_filter: row.get("notes_filter"),
        })
    }

    async fn find_item(&self, name_lower: &str) -> ingest_model::Result<Option<Item>> {
        let row = sqlx::query("SELECT id, name_lower, notes_filter FROM item WHERE name_lower = ?")
            .bind(name_lower)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_model_err)?;

        Ok(row.map(|row| Item {
            id: row.get("id"),
            name_lower: row.get("name_lower"),
            notes_filter: row.get("notes_filter"),
        }))
    }

    async fn upsert_document(&self, document: &Document) -> ingest_model::Result<UpsertOutcome> {
        let mut conn = self.pool.acquire().await.map_err(to_model_err)?;
        upsert_document_tx(&mut conn, document).await
    }

    async fn upsert_item_value(&self, value: &ItemValue) -> ingest_model::Result<(i64, bool)> {
        let mut conn = self.pool.acquire().await.map_err(to_model_err)?;
        upsert_item_value_tx(&mut conn, value).await
    }

    async fn replace_doc_item_values(
        &self,
        unid: &Unid,
        item_id: i64,
        item_value_ids: &[(i32, i64, bool)],
    ) -> ingest_model::Result<()> {
        let mut tx = self.pool.begin().await.map_err(to_model_err)?;
        replace_doc_item_values_tx(&mut tx, unid, item_id, item_value_ids).await?;
        tx.commit().await.map_err(to_model_err)?;
        Ok(())
    }

    async fn upsert_attachment(&self, attachment: &Attachment) -> ingest_model::Result<i64> {
        let mut conn = self.pool.acquire().await.map_err(to_model_err)?;
        upsert_attachment_tx(&mut conn, attachment).await
    }

    async fn set_document_views(&self, unid: &Unid, views: &[DocumentView]) -> ingest_model::Result<()> {
        let mut tx = self.pool.begin().await.map_err(to_model_err)?;

        for view in views {
            let mut view = view.clone();
            view.unid = unid.clone();
            set_document_view_tx(&mut tx, &view).await?;
        }

        tx.commit().await.map_err(to_model_err)?;
        Ok(())
    }

    async fn count_attachments(&self, unid: &Unid) -> ingest_model::Result<u32> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM attachment WHERE unid = ?")
            .bind(unid.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(to_model_err)?;
        let count: i64 = row.get("c");
        Ok(count as u32)
    }

    async fn commit_batch(
        &self,
        documents: &[PreparedDocument],
        checkpoint: &EtlCheckpoint,
    ) -> ingest_model::Result<Vec<UpsertOutcome>> {
        let mut tx = self.pool.begin().await.map_err(to_model_err)?;
        let mut outcomes = Vec::with_capacity(documents.len());

        for prepared in documents {
            let mut document = prepared.document.clone();

            let mut attachment_ids: Vec<(String, i64)> = Vec::with_capacity(prepared.attachments.len());
            let mut attachments_stored = 0u32;
            for attachment in &prepared.attachments {
                match upsert_attachment_tx(&mut tx, attachment).await {
                    Ok(id) => {
                        attachment_ids.push((attachment.filename.clone(), id));
                        attachments_stored += 1;
                    }
                    Err(e) => {
                        warn!(
                            unid = %document.unid,
                            filename = %attachment.filename,
                            error = %e,
                            "attachment insert failed, skipping"
                        );
                    }
                }
            }
            document.has_attachments = attachments_stored > 0;

            let mut outcome = upsert_document_tx(&mut tx, &document).await?;
            outcome.attachments_stored = attachments_stored;

            for item_write in &prepared.item_writes {
                let mut linked = Vec::with_capacity(item_write.values.len());
                for (order_idx, prepared_value) in item_write.values.iter().enumerate() {
                    let attachment_id = prepared_value.attachment_filename.as_ref().and_then(|f| {
                        attachment_ids
                            .iter()
                            .find(|(name, _)| name == f)
                            .map(|(_, id)| *id)
                    });
                    let (value, _) =
                        ItemValue::new(item_write.item_id, prepared_value.value.clone(), attachment_id);
                    let (item_value_id, inserted) = upsert_item_value_tx(&mut tx, &value).await?;
                    if inserted {
                        outcome.values_inserted += 1;
                    } else {
                        outcome.values_reused += 1;
                    }
                    linked.push((order_idx as i32, item_value_id, order_idx == 0));
                }
                if !linked.is_empty() {
                    replace_doc_item_values_tx(&mut tx, &document.unid, item_write.item_id, &linked)
                        .await?;
                }
            }

            set_document_view_tx(&mut tx, &prepared.view).await?;
            outcomes.push(outcome);
        }

        save_checkpoint_tx(&mut tx, checkpoint).await?;
        tx.commit().await.map_err(to_model_err)?;
        Ok(outcomes)
    }

    async fn load_checkpoint(
        &self,
        plan_id: i64,
        source_id: i64,
        view_name: &str,
    ) -> ingest_model::Result<Option<EtlCheckpoint>> {
        let row = sqlx::query(
            "SELECT plan_id, source_id, view_name, snapshot_sig, next_index, last_unid, updated_at \
             FROM etl_checkpoint WHERE plan_id = ? AND source_id = ? AND view_name = ?",
        )
        .bind(plan_id)
        .bind(source_id)
        .bind(view_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(to_model_err)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let last_unid: Option<String> = row.get("last_unid");
                let updated_at: String = row.get("updated_at");
                Ok(Some(EtlCheckpoint {
                    plan_id: row.get("plan_id"),
                    source_id: row.get("source_id"),
                    view_name: row.get("view_name"),
                    snapshot_sig: row.get("snapshot_sig"),
                    next_index: row.get("next_index"),
                    last_unid: last_unid.map(Unid::parse).transpose()?,
                    updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
                        .map_err(|e| {
                            ModelError::new(ingest_model::ErrorKind::Truncated, e.to_string())
                        })?
                        .with_timezone(&Utc),
                }))
            }
        }
    }

    async fn save_checkpoint(&self, checkpoint: &EtlCheckpoint) -> ingest_model::Result<()> {
        let mut conn = self.pool.acquire().await.map_err(to_model_err)?;
        save_checkpoint_tx(&mut conn, checkpoint).await
    }

    async fn start_run(&self, run: &EtlRun) -> ingest_model::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO etl_run (source_id, started_at, scanned, upserted, atts, errors) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(run.source_id)
        .bind(run.started_at.to_rfc3339())
        .bind(run.scanned)
        .bind(run.upserted)
        .bind(run.atts)
        .bind(run.errors)
        .execute(&self.pool)
        .await
        .map_err(to_model_err)?;
        Ok(result.last_insert_rowid())
    }

    async fn finish_run(&self, run: &EtlRun) -> ingest_model::Result<()> {
        sqlx::query(
            "UPDATE etl_run SET ended_at = ?, scanned = ?, upserted = ?, atts = ?, errors = ? \
             WHERE id = ?",
        )
        .bind(run.ended_at.map(|d| d.to_rfc3339()))
        .bind(run.scanned)
        .bind(run.upserted)
        .bind(run.atts)
        .bind(run.errors)
        .bind(run.id)
        .execute(&self.pool)
        .await
        .map_err(to_model_err)?;
        Ok(())
    }

    async fn list_plans(&self) -> ingest_model::Result<Vec<IngestionPlan>> {
        let rows = sqlx::query("SELECT id, server_name, filepath, enabled FROM ingestion_plan")
            .fetch_all(&self.pool)
            .await
            .map_err(to_model_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let enabled: i64 = row.get("enabled");
                IngestionPlan {
                    id: row.get("id"),
                    server_name: row.get("server_name"),
                    filepath: row.get("filepath"),
                    enabled: enabled != 0,
                }
            })
            .collect())
    }

    async fn list_plan_views(&self, plan_id: i64) -> ingest_model::Result<Vec<PlanView>> {
        let rows = sqlx::query(
            "SELECT id, plan_id, canonical_name, enabled, regex_override, priority \
             FROM plan_view WHERE plan_id = ? ORDER BY priority DESC",
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(to_model_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let enabled: i64 = row.get("enabled");
                PlanView {
                    id: row.get("id"),
                    plan_id: row.get("plan_id"),
                    canonical_name: row.get("canonical_name"),
                    enabled: enabled != 0,
                    regex_override: row.get("regex_override"),
                    priority: row.get("priority"),
                }
            })
            .collect())
    }

    async fn upsert_user(&self, user: &User) -> ingest_model::Result<()> {
        sqlx::query(
            "INSERT INTO directory_user \
             (id, display_name, user_principal_name, mail_nickname, mail, job_title, department, manager_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             display_name = excluded.display_name, user_principal_name = excluded.user_principal_name, \
             mail_nickname = excluded.mail_nickname, mail = excluded.mail, job_title = excluded.job_title, \
             department = excluded.department, manager_id = excluded.manager_id",
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.user_principal_name)
        .bind(&user.mail_nickname)
        .bind(&user.mail)
        .bind(&user.job_title)
        .bind(&user.department)
        .bind(&user.manager_id)
        .execute(&self.pool)
        .await
        .map_err(to_model_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    async fn test_sink() -> SqliteDocumentSink {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::sqlite::schema::init_schema(&pool).await.unwrap();
        SqliteDocumentSink::new(pool)
    }

    #[tokio::test]
    async fn get_or_create_source_is_idempotent() {
        let sink = test_sink().await;
        let a = sink
            .get_or_create_source("srv1", "/mail/a.nsf", "Mailbox A")
            .await
            .unwrap();
        let b = sink
            .get_or_create_source("srv1", "/mail/a.nsf", "Mailbox A renamed")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.title, "Mailbox A renamed");
    }

    #[tokio::test]
    async fn upsert_document_insert_then_update() {
        let sink = test_sink().await;
        sink.get_or_create_source("srv1", "/mail/a.nsf", "Mailbox A")
            .await
            .unwrap();
        let unid = Unid::parse("0123456789ABCDEF0123456789ABCDEF").unwrap();
        let doc = Document {
            unid: unid.clone(),
            source_id: 1,
            note_id: None,
            form: Some("Memo".into()),
            subject: Some("Hello".into()),
            author: None,
            created_at: None,
            modified_at: None,
            has_attachments: false,
            text_hash: Document::compute_text_hash("body"),
            text_body: "body".into(),
            doc_size_bytes: 4,
        };
        let outcome = sink.upsert_document(&doc).await.unwrap();
        assert!(outcome.document_inserted);

        let outcome2 = sink.upsert_document(&doc).await.unwrap();
        assert!(outcome2.document_updated);
        assert!(!outcome2.document_inserted);
    }

    #[tokio::test]
    async fn upsert_item_value_dedups_by_hash() {
        let sink = test_sink().await;
        let item = sink.get_or_create_item("subject").await.unwrap();
        let (value, _) = ItemValue::new(item.id, TypedValue::String("hi".into()), None);

        let (id1, inserted1) = sink.upsert_item_value(&value).await.unwrap();
        assert!(inserted1);
        let (id2, inserted2) = sink.upsert_item_value(&value).await.unwrap();
        assert!(!inserted2);
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn upsert_item_value_handles_datetime_kind() {
        let sink = test_sink().await;
        let item = sink.get_or_create_item("created".into()).await.unwrap();
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let (value, _) = ItemValue::new(item.id, TypedValue::Datetime(dt), None);
        let (_id, inserted) = sink.upsert_item_value(&value).await.unwrap();
        assert!(inserted);
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let sink = test_sink().await;
        let checkpoint = EtlCheckpoint {
            plan_id: 1,
            source_id: 1,
            view_name: "($All)".into(),
            snapshot_sig: "abc".into(),
            next_index: 50,
            last_unid: Some(Unid::parse("0123456789ABCDEF0123456789ABCDEF").unwrap()),
            updated_at: Utc::now(),
        };
        sink.save_checkpoint(&checkpoint).await.unwrap();
        let loaded = sink.load_checkpoint(1, 1, "($All)").await.unwrap().unwrap();
        assert_eq!(loaded.next_index, 50);
        assert_eq!(loaded.snapshot_sig, "abc");
    }

    #[tokio::test]
    async fn load_checkpoint_missing_is_none() {
        let sink = test_sink().await;
        assert!(sink.load_checkpoint(9, 9, "nope").await.unwrap().is_none());
    }
}
