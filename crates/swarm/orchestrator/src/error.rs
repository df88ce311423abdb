//! Error types for swarm-orchestrator crate.
//!
//! Component failures never surface here: they are folded into an
//! orchestration's effectiveness. These errors cover admission refusals,
//! lookups, configuration and the subsystems' own construction errors.

use std::path::PathBuf;

use swarm_healing::HealingError;
use swarm_recovery::RecoveryError;
use swarm_resilience::ResilienceError;
use swarm_types::OrchestrationId;
use thiserror::Error;

/// Errors raised by the orchestration coordinator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Active orchestration cap reached; the trigger was refused.
    #[error("orchestration concurrency exhausted: {active}/{limit} active")]
    ConcurrencyExhausted { active: usize, limit: usize },

    /// The coordinator is shutting down and accepts no new triggers.
    #[error("coordinator is shutting down")]
    ShuttingDown,

    /// Orchestration is neither active nor in completed history.
    #[error("orchestration not found: {0}")]
    NotFound(OrchestrationId),

    /// Orchestration was stopped before it could finish.
    #[error("orchestration {id} stopped: {reason}")]
    Stopped { id: OrchestrationId, reason: String },

    /// The detection provider could not analyse a trigger.
    #[error("detection failed: {0}")]
    Detection(String),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Healing(#[from] HealingError),

    /// Configuration file could not be read or parsed.
    #[error("failed to load config {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OrchestratorError {
    /// Admission refusals, as opposed to failures.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ConcurrencyExhausted { .. } | OrchestratorError::ShuttingDown
        )
    }
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
