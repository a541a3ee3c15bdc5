//! Embedded schema DDL. Idempotent: safe to run against an existing
//! database on every startup.

use crate::error::Result;
use sqlx::SqlitePool;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS source (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_name TEXT NOT NULL,
    filepath TEXT NOT NULL,
    title TEXT NOT NULL,
    replica_id TEXT,
    last_seen_at TEXT NOT NULL,
    UNIQUE(server_name, filepath)
);

CREATE TABLE IF NOT EXISTS ingestion_plan (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_name TEXT NOT NULL,
    filepath TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    UNIQUE(server_name, filepath)
);

CREATE TABLE IF NOT EXISTS plan_view (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id INTEGER NOT NULL REFERENCES ingestion_plan(id),
    canonical_name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    regex_override TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    UNIQUE(plan_id, canonical_name)
);

CREATE TABLE IF NOT EXISTS document (
    unid TEXT PRIMARY KEY,
    source_id INTEGER NOT NULL REFERENCES source(id),
    note_id TEXT,
    form TEXT,
    subject TEXT,
    author TEXT,
    created_at TEXT,
    modified_at TEXT,
    has_attachments INTEGER NOT NULL DEFAULT 0,
    text_hash BLOB,
    text_body TEXT NOT NULL DEFAULT '',
    doc_size_bytes INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_document_source ON document(source_id);

CREATE TABLE IF NOT EXISTS item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name_lower TEXT NOT NULL UNIQUE,
    notes_filter INTEGER
);

CREATE TABLE IF NOT EXISTS item_value (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES item(id),
    val_kind TEXT NOT NULL,
    val_hash BLOB NOT NULL,
    v_string TEXT,
    v_text TEXT,
    v_number REAL,
    v_datetime TEXT,
    v_bool INTEGER,
    v_bytes BLOB,
    attachment_id INTEGER,
    UNIQUE(item_id, val_hash)
);

CREATE TABLE IF NOT EXISTS doc_item_value (
    unid TEXT NOT NULL REFERENCES document(unid),
    item_id INTEGER NOT NULL REFERENCES item(id),
    val_order INTEGER NOT NULL,
    item_value_id INTEGER NOT NULL REFERENCES item_value(id),
    is_summary INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (unid, item_id, val_order)
);

CREATE TABLE IF NOT EXISTS attachment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    unid TEXT NOT NULL REFERENCES document(unid),
    filename TEXT NOT NULL,
    sha256 BLOB NOT NULL,
    item_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    mime_type TEXT,
    size_bytes INTEGER NOT NULL,
    storage_path TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(unid, filename, sha256)
);

CREATE INDEX IF NOT EXISTS idx_attachment_unid ON attachment(unid);

CREATE TABLE IF NOT EXISTS document_view (
    unid TEXT NOT NULL REFERENCES document(unid),
    view_name TEXT NOT NULL,
    category_path TEXT NOT NULL,
    leaf_category TEXT NOT NULL,
    PRIMARY KEY (unid, view_name, category_path)
);

CREATE INDEX IF NOT EXISTS idx_document_view_view ON document_view(view_name);

CREATE TABLE IF NOT EXISTS etl_checkpoint (
    plan_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    view_name TEXT NOT NULL,
    snapshot_sig TEXT NOT NULL,
    next_index INTEGER NOT NULL,
    last_unid TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (plan_id, source_id, view_name)
);

CREATE TABLE IF NOT EXISTS etl_run (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES source(id),
    started_at TEXT NOT NULL,
    ended_at TEXT,
    scanned INTEGER NOT NULL DEFAULT 0,
    upserted INTEGER NOT NULL DEFAULT 0,
    atts INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS directory_user (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    user_principal_name TEXT NOT NULL,
    mail_nickname TEXT NOT NULL,
    mail TEXT,
    job_title TEXT,
    department TEXT,
    manager_id TEXT
);
"#;

/// Apply the embedded schema. Safe to call on every startup; every
/// statement is `CREATE ... IF NOT EXISTS`.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
