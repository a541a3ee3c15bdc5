//! Thin read layer over the configured ingestion plans and their views.

use crate::error::Result;
use ingest_model::{DocumentSink, IngestionPlan, PlanView};
use std::sync::Arc;

pub struct PlanStore {
    sink: Arc<dyn DocumentSink>,
}

impl PlanStore {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self { sink }
    }

    /// All enabled plans, in no particular order.
    pub async fn enabled_plans(&self) -> Result<Vec<IngestionPlan>> {
        Ok(self
            .sink
            .list_plans()
            .await?
            .into_iter()
            .filter(|p| p.enabled)
            .collect())
    }

    /// A plan's enabled views, highest priority first (already ordered
    /// by the sink's query).
    pub async fn enabled_views(&self, plan_id: i64) -> Result<Vec<PlanView>> {
        Ok(self
            .sink
            .list_plan_views(plan_id)
            .await?
            .into_iter()
            .filter(|v| v.enabled)
            .collect())
    }
}
