//! Drives a full extraction run for one source: resolve the plan's
//! views against what the source actually exposes, page each view in
//! checkpointed batches, upsert every document through the
//! [`DocumentUpserter`], and carry the [`ingest_model::EtlRun`] counters
//! to completion whether the run succeeds or fails.

use crate::checkpoint::{snapshot_signature, SnapshotEngine, BATCH_SIZE};
use crate::error::{ErrorCategory, OrchestratorError, Result};
use crate::plan_store::PlanStore;
use crate::run::{RunStage, RunStateMachine};
use crate::source::DxSource;
use crate::upserter::DocumentUpserter;
use crate::view_selector::ViewSelector;
use ingest_bridge::ViewEntry;
use ingest_model::{DocumentSink, EtlRun, IngestionPlan, PlanView, Source, UpsertOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// Aggregated outcome of [`PipelineOrchestrator::run_source`], reported
/// to the caller on top of what's durably recorded in the `EtlRun` row.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub plans_processed: usize,
    pub views_processed: usize,
    pub documents_scanned: i64,
    pub documents_upserted: i64,
    pub attachments_stored: i64,
    pub errors: i64,
}

/// Coordinates one source's extraction across all of its enabled plans
/// and views. Holds no state of its own beyond shared handles; a fresh
/// [`RunStateMachine`] is created per `run_source` call.
pub struct PipelineOrchestrator {
    sink: Arc<dyn DocumentSink>,
    source: Arc<dyn DxSource>,
    upserter: DocumentUpserter,
    view_selector: ViewSelector,
}

impl PipelineOrchestrator {
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        source: Arc<dyn DxSource>,
        upserter: DocumentUpserter,
    ) -> Self {
        Self {
            sink,
            source,
            upserter,
            view_selector: ViewSelector::with_defaults(),
        }
    }

    /// Run every enabled plan matching `server_name`/`filepath` against
    /// the configured source, finalizing one `EtlRun` row for the whole
    /// call regardless of outcome.
    pub async fn run_source(
        &self,
        db_source: &Source,
        available_views: &[String],
    ) -> Result<RunSummary> {
        let plan_store = PlanStore::new(self.sink.clone());
        let mut state_machine = RunStateMachine::new(EtlRun::start(db_source.id));
        state_machine.start(RunStage::Discovering)?;

        let plans: Vec<IngestionPlan> = plan_store
            .enabled_plans()
            .await?
            .into_iter()
            .filter(|p| p.server_name == db_source.server_name && p.filepath == db_source.filepath)
            .collect();

        let mut summary = RunSummary::default();
        let mut first_error: Option<(String, ErrorCategory)> = None;

        for plan in &plans {
            let views = match plan_store.enabled_views(plan.id).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(plan_id = plan.id, error = %e, "failed to load plan views");
                    summary.errors += 1;
                    first_error.get_or_insert((e.to_string(), ErrorCategory::Transient));
                    continue;
                }
            };
            summary.plans_processed += 1;

            for view in &views {
                state_machine.update_stage(RunStage::Paging)?;
                match self
                    .run_view(plan.id, db_source.id, view, available_views, &mut state_machine)
                    .await
                {
                    Ok(view_summary) => {
                        summary.views_processed += 1;
                        summary.documents_scanned += view_summary.documents_scanned;
                        summary.documents_upserted += view_summary.documents_upserted;
                        summary.attachments_stored += view_summary.attachments_stored;
                    }
                    Err(e) => {
                        let category = classify(&e);
                        warn!(plan_id = plan.id, view = %view.canonical_name, error = %e, "view extraction failed");
                        summary.errors += 1;
                        first_error.get_or_insert((e.to_string(), category));
                    }
                }
            }
        }

        state_machine.update_stage(RunStage::Finalizing)?;
        state_machine.run.scanned = summary.documents_scanned;
        state_machine.run.upserted = summary.documents_upserted;
        state_machine.run.atts = summary.attachments_stored;
        state_machine.run.errors = summary.errors;

        match first_error {
            None => {
                state_machine.complete()?;
            }
            Some((message, category)) => {
                state_machine.fail(message, category, 0)?;
            }
        }
        self.sink.finish_run(&state_machine.run).await?;

        info!(
            source_id = db_source.id,
            plans = summary.plans_processed,
            views = summary.views_processed,
            scanned = summary.documents_scanned,
            upserted = summary.documents_upserted,
            attachments = summary.attachments_stored,
            errors = summary.errors,
            "run finished"
        );

        Ok(summary)
    }

    async fn run_view(
        &self,
        plan_id: i64,
        source_id: i64,
        view: &PlanView,
        available_views: &[String],
        state_machine: &mut RunStateMachine,
    ) -> Result<RunSummary> {
        let resolved_name = match self.view_selector.select(
            &view.canonical_name,
            view.regex_override.as_deref(),
            available_views,
        ) {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    "{}",
                    ViewSelector::no_match_diagnostic(&view.canonical_name, available_views)
                );
                return Err(OrchestratorError::ViewNotFound(view.canonical_name.clone()));
            }
        };

        self.source
            .get_view(&resolved_name)
            .await
            .map_err(OrchestratorError::from)?;

        let mut entries: Vec<ViewEntry> = Vec::new();
        let mut start = 0i64;
        loop {
            let page = self
                .source
                .page_view(&resolved_name, start, BATCH_SIZE as u32)
                .await
                .map_err(OrchestratorError::from)?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            entries.extend(page);
            start += page_len as i64;
            if page_len < BATCH_SIZE {
                break;
            }
        }

        let ordered_unids: Vec<_> = entries.iter().map(|e| e.unid.clone()).collect();
        let signature = snapshot_signature(&ordered_unids);

        let snapshot = SnapshotEngine::new(self.sink.clone());
        let resume = snapshot
            .resume_point(plan_id, source_id, &resolved_name, &signature)
            .await?;
        if !resume.signature_matched && resume.next_index == 0 {
            info!(view = %resolved_name, "view contents changed since last run, restarting from zero");
        }

        let mut summary = RunSummary::default();
        state_machine.update_stage(RunStage::Upserting)?;

        let mut index = resume.next_index;
        while (index as usize) < entries.len() {
            let end = (index as usize + BATCH_SIZE).min(entries.len());
            let batch = &entries[index as usize..end];

            let mut prepared = Vec::with_capacity(batch.len());
            for entry in batch {
                summary.documents_scanned += 1;
                match self
                    .upserter
                    .prepare_one(
                        source_id,
                        &*self.source,
                        &entry.unid,
                        &resolved_name,
                        &entry.category_path,
                    )
                    .await
                {
                    Ok(doc) => prepared.push(doc),
                    Err(e) => {
                        warn!(unid = %entry.unid, error = %e, "document upsert failed, continuing");
                        summary.errors += 1;
                    }
                }
            }

            index = end as i64;
            let last_unid = batch.last().map(|e| e.unid.clone());
            let checkpoint = SnapshotEngine::build_checkpoint(
                plan_id,
                source_id,
                &resolved_name,
                &signature,
                index,
                last_unid,
            );
            // One transaction for the whole batch: every prepared document's
            // rows land with the checkpoint advance, or none of them do
            // (§4.4/§5).
            let outcomes: Vec<UpsertOutcome> = self.sink.commit_batch(&prepared, &checkpoint).await?;
            for outcome in &outcomes {
                if outcome.document_inserted || outcome.document_updated {
                    summary.documents_upserted += 1;
                }
                summary.attachments_stored += outcome.attachments_stored as i64;
            }
        }

        Ok(summary)
    }
}

fn classify(err: &OrchestratorError) -> ErrorCategory {
    match err {
        OrchestratorError::Bridge(b) => ingest_bridge::classify(&b.to_string()).into(),
        _ => ErrorCategory::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_bridge_transient_message() {
        let err = OrchestratorError::Bridge(ingest_bridge::BridgeError::protocol("connection reset"));
        assert_eq!(classify(&err), ErrorCategory::Transient);
    }

    #[test]
    fn classify_non_bridge_error_is_permanent() {
        let err = OrchestratorError::ViewNotFound("by category".into());
        assert_eq!(classify(&err), ErrorCategory::Permanent);
    }
}
