//! Turns a [`RawDocument`] fetched from a [`DxSource`] into the
//! normalized, deduplicated rows a [`DocumentSink`] stores, including
//! attachment content-addressing, per-item value ordering, `$FILE`
//! linkage, and view-membership recording (§4.5).

use crate::error::{OrchestratorError, Result};
use crate::source::DxSource;
use ingest_bridge::{RawAttachment, RawDocument, RawItemReading};
use ingest_model::{
    Attachment, AttachmentKind, CasStore, Document, DocumentSink, DocumentView, Item,
    PreparedDocument, PreparedItemValue, PreparedItemWrite, TypedValue, UnknownItemPolicy, Unid,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_SIMPLE_BODY_CHARS: usize = 4096;

pub struct DocumentUpserter {
    sink: Arc<dyn DocumentSink>,
    cas: Arc<dyn CasStore>,
    unknown_item_policy: UnknownItemPolicy,
}

impl DocumentUpserter {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        cas: Arc<dyn CasStore>,
        unknown_item_policy: UnknownItemPolicy,
    ) -> Self {
        Self {
            sink,
            cas,
            unknown_item_policy,
        }
    }

    /// Resolve one document encountered while paging `view_name`, at
    /// `category_path` as reported by that view's entry, into a
    /// [`PreparedDocument`] ready for [`DocumentSink::commit_batch`].
    ///
    /// Everything here is either read-only (item/catalog lookups) or
    /// filesystem-idempotent (CAS puts); no row is written to the sink
    /// until the caller commits the batch this document belongs to.
    pub async fn prepare_one(
        &self,
        source_id: i64,
        source: &dyn DxSource,
        unid: &Unid,
        view_name: &str,
        category_path: &str,
    ) -> Result<PreparedDocument> {
        let raw = source
            .read_document(unid)
            .await
            .map_err(OrchestratorError::from)?;

        let groups = group_readings(&raw.items);
        let document = self.build_document(source_id, &raw, &groups);

        let raw_attachments = source
            .read_attachments(unid)
            .await
            .map_err(OrchestratorError::from)?;
        let attachments = self.stage_attachments(unid, raw_attachments).await?;
        let attachment_filenames: Vec<&str> =
            attachments.iter().map(|a| a.filename.as_str()).collect();

        let mut item_writes = Vec::new();
        for name_lower in &groups.order {
            let readings = &groups.by_name[name_lower];
            let found = self.sink.find_item(name_lower).await?;
            if !Item::should_store(found.as_ref(), self.unknown_item_policy) {
                continue;
            }
            let item = match found {
                Some(item) => item,
                None => self.sink.get_or_create_item(name_lower).await?,
            };

            let mut values = Vec::new();
            if name_lower == "$file" {
                for reading in readings.iter() {
                    let Some(filename) = &reading.string_value else {
                        continue;
                    };
                    let attachment_filename = attachment_filenames
                        .iter()
                        .find(|f| *f == filename)
                        .map(|f| f.to_string());
                    values.push(PreparedItemValue {
                        value: TypedValue::classify_string(filename, false),
                        attachment_filename,
                    });
                }
            } else {
                for reading in readings.iter() {
                    let Some(typed) = classify_reading(reading) else {
                        continue;
                    };
                    values.push(PreparedItemValue {
                        value: typed,
                        attachment_filename: None,
                    });
                }
            }

            if !values.is_empty() {
                item_writes.push(PreparedItemWrite {
                    item_id: item.id,
                    values,
                });
            }
        }

        let canonical_path = DocumentView::canonicalize_category_path(category_path);
        let leaf_category = DocumentView::leaf_of(&canonical_path);
        let view = DocumentView {
            unid: unid.clone(),
            view_name: view_name.to_string(),
            category_path: canonical_path,
            leaf_category,
        };

        debug!(unid = %unid, view = %view_name, items = item_writes.len(), "document prepared");
        Ok(PreparedDocument {
            document,
            attachments,
            item_writes,
            view,
        })
    }

    /// Stage and content-address every extractable embedded object.
    /// Extraction failure is logged and the object is skipped; the
    /// document itself still proceeds (§4.5 step 5). The sink row for
    /// each resulting [`Attachment`] is written later, inside the
    /// batch's shared transaction.
    async fn stage_attachments(
        &self,
        unid: &Unid,
        raw_attachments: Vec<RawAttachment>,
    ) -> Result<Vec<Attachment>> {
        let mut staged = Vec::with_capacity(raw_attachments.len());
        for raw_att in raw_attachments {
            let Some(kind) = AttachmentKind::from_object_type(raw_att.object_type) else {
                warn!(
                    unid = %unid,
                    object_type = raw_att.object_type,
                    filename = %raw_att.filename,
                    "skipping embedded object of unrecognized type"
                );
                continue;
            };

            let tmp = match stage_attachment_bytes(&raw_att.bytes).await {
                Ok(tmp) => tmp,
                Err(e) => {
                    warn!(
                        unid = %unid,
                        filename = %raw_att.filename,
                        error = %e,
                        "failed to stage attachment bytes for the CAS; skipping"
                    );
                    continue;
                }
            };
            let put_result = self.cas.put(tmp.path()).await;
            let (hash, storage_path, size_bytes) = match put_result {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        unid = %unid,
                        filename = %raw_att.filename,
                        error = %e,
                        "failed to store attachment in the CAS; skipping"
                    );
                    continue;
                }
            };

            staged.push(Attachment {
                id: 0,
                unid: unid.clone(),
                filename: raw_att.filename,
                sha256: hash,
                item_name: raw_att.item_name,
                kind,
                mime_type: raw_att.mime_type,
                size_bytes: size_bytes as i64,
                storage_path,
                created_at: chrono::Utc::now(),
            });
        }
        Ok(staged)
    }

    fn build_document(&self, source_id: i64, raw: &RawDocument, groups: &GroupedReadings) -> Document {
        let subject = find_first_string(groups, &["subject"])
            .map(|s| truncate_logged(&raw.unid, "subject", &s, 1024));
        let author = find_first_string(groups, &["author", "from", "postedby"])
            .map(|s| truncate_logged(&raw.unid, "author", &s, 512));
        let form = raw
            .form
            .as_deref()
            .map(|f| truncate_logged(&raw.unid, "form", f, 256));
        let text_body = build_text_body(groups);

        Document {
            unid: raw.unid.clone(),
            source_id,
            note_id: raw.note_id.clone(),
            form,
            subject,
            author,
            created_at: raw.created_at,
            modified_at: raw.modified_at,
            has_attachments: false,
            text_hash: Document::compute_text_hash(&text_body),
            doc_size_bytes: text_body.len() as i64,
            text_body,
        }
    }
}

/// Stage raw attachment bytes to a temp file so [`CasStore::put`] can hash
/// and copy it in bounded-size chunks rather than take an in-memory slice.
async fn stage_attachment_bytes(bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    })
    .await
    .map_err(|e| anyhow::anyhow!("attachment staging task panicked: {e}"))?
    .map_err(|e| anyhow::anyhow!("staging attachment bytes: {e}").into())
}

fn truncate_logged(unid: &Unid, field: &str, raw: &str, max_chars: usize) -> String {
    let char_count = raw.chars().count();
    let truncated: String = raw.chars().take(max_chars).collect();
    if char_count > max_chars {
        warn!(unid = %unid, field, max_chars, actual_chars = char_count, "truncated oversized field");
    }
    truncated
}

/// Readings grouped by lowercased item name, preserving first-seen order
/// across `raw.items` so per-item `val_order` reflects reading order.
struct GroupedReadings<'a> {
    order: Vec<String>,
    by_name: HashMap<String, Vec<&'a RawItemReading>>,
}

fn group_readings(readings: &[RawItemReading]) -> GroupedReadings<'_> {
    let mut order = Vec::new();
    let mut by_name: HashMap<String, Vec<&RawItemReading>> = HashMap::new();
    for reading in readings {
        let name_lower = reading.item_name.to_lowercase();
        by_name
            .entry(name_lower.clone())
            .or_insert_with(|| {
                order.push(name_lower.clone());
                Vec::new()
            })
            .push(reading);
    }
    GroupedReadings { order, by_name }
}

fn find_first_string(groups: &GroupedReadings<'_>, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|name| {
        groups
            .by_name
            .get(*name)
            .and_then(|readings| readings.first())
            .and_then(|r| r.string_value.clone())
    })
}

fn reading_as_string(reading: &RawItemReading) -> Option<String> {
    if let Some(s) = &reading.string_value {
        return Some(s.clone());
    }
    if let Some(n) = reading.number_value {
        return Some(n.to_string());
    }
    if let Some(dt) = reading.datetime_value {
        return Some(dt.to_string());
    }
    if let Some(b) = reading.bool_value {
        return Some(b.to_string());
    }
    None
}

/// Concatenate rich-text items as `"<name>:\n<text>\n"` and short simple
/// items as `"<name>: <joined>"`, in first-seen order, newline-joined
/// (§4.5 step 3). Simple items whose joined value exceeds
/// [`MAX_SIMPLE_BODY_CHARS`] are dropped from the body entirely.
fn build_text_body(groups: &GroupedReadings<'_>) -> String {
    let mut sections = Vec::new();
    for name in &groups.order {
        let readings = &groups.by_name[name];
        let values: Vec<String> = readings.iter().filter_map(|r| reading_as_string(r)).collect();
        if values.is_empty() {
            continue;
        }
        let is_rich = readings.iter().any(|r| r.is_rich_text);
        if is_rich {
            sections.push(format!("{name}:\n{}\n", values.join("\n")));
        } else {
            let joined = values.join(", ");
            if joined.chars().count() <= MAX_SIMPLE_BODY_CHARS {
                sections.push(format!("{name}: {joined}"));
            }
        }
    }
    sections.join("\n")
}

fn classify_reading(reading: &RawItemReading) -> Option<TypedValue> {
    if let Some(s) = &reading.string_value {
        return Some(TypedValue::classify_string(s, reading.is_rich_text));
    }
    if let Some(n) = reading.number_value {
        return Some(TypedValue::Number(n));
    }
    if let Some(dt) = reading.datetime_value {
        return Some(TypedValue::Datetime(dt));
    }
    if let Some(b) = reading.bool_value {
        return Some(TypedValue::Bool(b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(name: &str, string_value: Option<&str>, is_rich_text: bool) -> RawItemReading {
        RawItemReading {
            item_name: name.into(),
            is_rich_text,
            string_value: string_value.map(String::from),
            number_value: None,
            datetime_value: None,
            bool_value: None,
        }
    }

    #[test]
    fn classify_reading_prefers_string() {
        let mut r = reading("Subject", Some("hi"), false);
        r.number_value = Some(1.0);
        assert!(matches!(classify_reading(&r), Some(TypedValue::String(_))));
    }

    #[test]
    fn classify_reading_falls_back_to_number() {
        let mut r = reading("Amount", None, false);
        r.number_value = Some(42.0);
        assert!(matches!(classify_reading(&r), Some(TypedValue::Number(n)) if n == 42.0));
    }

    #[test]
    fn classify_reading_none_when_all_fields_empty() {
        let r = reading("Empty", None, false);
        assert!(classify_reading(&r).is_none());
    }

    #[test]
    fn group_readings_preserves_first_seen_order_and_groups_multivalues() {
        let readings = vec![
            reading("Category", Some("a"), false),
            reading("Subject", Some("s"), false),
            reading("Category", Some("b"), false),
        ];
        let groups = group_readings(&readings);
        assert_eq!(groups.order, vec!["category", "subject"]);
        assert_eq!(groups.by_name["category"].len(), 2);
    }

    #[test]
    fn build_text_body_formats_rich_text_with_trailing_newline() {
        let readings = vec![reading("Body", Some("hello world"), true)];
        let groups = group_readings(&readings);
        assert_eq!(build_text_body(&groups), "body:\nhello world\n");
    }

    #[test]
    fn build_text_body_formats_simple_items_inline() {
        let readings = vec![reading("Subject", Some("hi"), false)];
        let groups = group_readings(&readings);
        assert_eq!(build_text_body(&groups), "subject: hi");
    }

    #[test]
    fn build_text_body_drops_oversized_simple_items() {
        let long = "x".repeat(MAX_SIMPLE_BODY_CHARS + 1);
        let readings = vec![reading("Notes", Some(&long), false)];
        let groups = group_readings(&readings);
        assert_eq!(build_text_body(&groups), "");
    }

    #[test]
    fn build_text_body_joins_multiple_sections_with_newline() {
        let readings = vec![
            reading("Subject", Some("hi"), false),
            reading("Body", Some("text"), true),
        ];
        let groups = group_readings(&readings);
        assert_eq!(build_text_body(&groups), "subject: hi\nbody:\ntext\n");
    }

    #[test]
    fn find_first_string_checks_candidates_in_order() {
        let readings = vec![reading("postedby", Some("poster"), false)];
        let groups = group_readings(&readings);
        assert_eq!(
            find_first_string(&groups, &["author", "from", "postedby"]),
            Some("poster".to_string())
        );
    }

    #[test]
    fn truncate_logged_truncates_by_char_count() {
        let unid = Unid::parse(format!("{:032X}", 1)).unwrap();
        let result = truncate_logged(&unid, "subject", &"x".repeat(10), 5);
        assert_eq!(result.chars().count(), 5);
    }
}
