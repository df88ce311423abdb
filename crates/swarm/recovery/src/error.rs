//! Error types for swarm-recovery crate.
//!
//! Exhaustion, vetoes and refusals are separate variants so callers can
//! report them as distinct outcomes.

use swarm_types::WorkflowId;
use thiserror::Error;

use crate::workflow::WorkflowStatus;

/// Errors raised by the recovery workflow engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecoveryError {
    /// No strategy in the catalog matches the trigger.
    #[error("no recovery strategy matches trigger {trigger_id} ({trigger_type})")]
    NoMatchingStrategy {
        trigger_id: String,
        trigger_type: String,
    },

    /// Every matching strategy was vetoed by the safety monitor.
    #[error("no safe recovery strategy for trigger {trigger_id}: {}", vetoes.join("; "))]
    NoSafeStrategy {
        trigger_id: String,
        vetoes: Vec<String>,
    },

    /// Concurrent workflow cap reached.
    #[error("recovery concurrency exhausted: {active}/{limit} workflows active")]
    ConcurrencyExhausted { active: usize, limit: usize },

    /// Workflow is neither active nor in completed history.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// Operation not allowed in the workflow's current status.
    #[error("cannot {operation} workflow {workflow_id} while {status}")]
    InvalidState {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        operation: &'static str,
    },

    /// Workflow was cancelled while it ran.
    #[error("workflow {workflow_id} cancelled: {reason}")]
    Cancelled {
        workflow_id: WorkflowId,
        reason: String,
    },

    /// Strategy definition is malformed.
    #[error("invalid strategy {strategy_id}: {reason}")]
    InvalidStrategy { strategy_id: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for recovery operations.
pub type RecoveryResult<T> = Result<T, RecoveryError>;
