//! ETL run orchestration: resolves a plan's views against a source,
//! pages through them in checkpointed batches, and upserts documents
//! through a sink, tracking progress with a per-run state machine.

pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod plan_store;
pub mod run;
pub mod source;
pub mod upserter;
pub mod view_selector;

pub use checkpoint::{snapshot_signature, ResumePoint, SnapshotEngine, BATCH_SIZE};
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use orchestrator::{PipelineOrchestrator, RunSummary};
pub use plan_store::PlanStore;
pub use run::{RunStage, RunState, RunStateMachine};
pub use source::DxSource;
pub use upserter::DocumentUpserter;
pub use view_selector::ViewSelector;
