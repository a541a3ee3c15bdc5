//! ETL run lifecycle: the tagged `RunState` enum and the
//! `RunStateMachine` that enforces valid transitions between them,
//! generalized from a job state machine to a per-source extraction run.

use crate::error::{ErrorCategory, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use ingest_model::EtlRun;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStage {
    Discovering,
    Paging,
    Upserting,
    Finalizing,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Discovering => "discovering",
            RunStage::Paging => "paging",
            RunStage::Upserting => "upserting",
            RunStage::Finalizing => "finalizing",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of an [`EtlRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        current_stage: RunStage,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        cancelled_at: DateTime<Utc>,
        reason: String,
    },
}

impl RunState {
    pub fn state_name(&self) -> &'static str {
        match self {
            RunState::Queued { .. } => "queued",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Failed { .. } | RunState::Cancelled { .. }
        )
    }
}

/// Drives `RunState` transitions and keeps the underlying [`EtlRun`]
/// counters in sync; the orchestrator persists `run` via
/// `DocumentSink::finish_run` regardless of which terminal state it
/// reaches, since counters must be recorded even on failure.
pub struct RunStateMachine {
    pub run: EtlRun,
    state: RunState,
}

impl RunStateMachine {
    pub fn new(run: EtlRun) -> Self {
        let queued_at = run.started_at;
        Self {
            run,
            state: RunState::Queued { queued_at },
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn start(&mut self, stage: RunStage) -> Result<()> {
        match &self.state {
            RunState::Queued { .. } => {
                self.state = RunState::Running {
                    started_at: Utc::now(),
                    current_stage: stage,
                };
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    pub fn update_stage(&mut self, stage: RunStage) -> Result<()> {
        match &mut self.state {
            RunState::Running { current_stage, .. } => {
                *current_stage = stage;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: "update_stage".to_string(),
            }),
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        match &self.state {
            RunState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;
                self.state = RunState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                };
                self.run.finish();
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    /// Transition to `Failed`, carrying the counters accumulated so far.
    /// Per the invariant that a run must be finalized even on failure,
    /// callers still persist `self.run` after calling this.
    pub fn fail(&mut self, error: String, category: ErrorCategory, retry_count: u32) -> Result<()> {
        match &self.state {
            RunState::Running { started_at, .. } | RunState::Failed { started_at, .. } => {
                let now = Utc::now();
                let next_retry_at = if retry_count < 3 && category == ErrorCategory::Transient {
                    Some(now + chrono::Duration::seconds(2i64.pow(retry_count)))
                } else {
                    None
                };
                self.state = RunState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    error_category: category,
                    retry_count,
                    next_retry_at,
                };
                self.run.finish();
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    pub fn cancel(&mut self, reason: String) -> Result<()> {
        if self.state.is_terminal() {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: "cancelled".to_string(),
            });
        }
        self.state = RunState::Cancelled {
            cancelled_at: Utc::now(),
            reason,
        };
        self.run.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_to_running_to_completed() {
        let mut sm = RunStateMachine::new(EtlRun::start(1));
        sm.start(RunStage::Discovering).unwrap();
        assert!(matches!(sm.state(), RunState::Running { .. }));
        sm.update_stage(RunStage::Upserting).unwrap();
        sm.complete().unwrap();
        assert!(matches!(sm.state(), RunState::Completed { .. }));
        assert!(sm.run.ended_at.is_some());
    }

    #[test]
    fn transient_failure_schedules_retry() {
        let mut sm = RunStateMachine::new(EtlRun::start(1));
        sm.start(RunStage::Paging).unwrap();
        sm.fail("connection reset".into(), ErrorCategory::Transient, 0)
            .unwrap();
        match sm.state() {
            RunState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_some()),
            _ => panic!("expected failed"),
        }
        assert!(sm.run.ended_at.is_some());
    }

    #[test]
    fn permanent_failure_does_not_retry() {
        let mut sm = RunStateMachine::new(EtlRun::start(1));
        sm.start(RunStage::Paging).unwrap();
        sm.fail("bad unid".into(), ErrorCategory::Permanent, 0).unwrap();
        match sm.state() {
            RunState::Failed { next_retry_at, .. } => assert!(next_retry_at.is_none()),
            _ => panic!("expected failed"),
        }
    }

    #[test]
    fn cannot_cancel_terminal_run() {
        let mut sm = RunStateMachine::new(EtlRun::start(1));
        sm.start(RunStage::Paging).unwrap();
        sm.complete().unwrap();
        assert!(sm.cancel("too late".into()).is_err());
    }

    #[test]
    fn cannot_start_twice() {
        let mut sm = RunStateMachine::new(EtlRun::start(1));
        sm.start(RunStage::Paging).unwrap();
        assert!(sm.start(RunStage::Paging).is_err());
    }
}
