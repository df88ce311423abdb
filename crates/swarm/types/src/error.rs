//! Error types shared across swarm crates.

use thiserror::Error;

/// Errors raised while executing an action through the action hook.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    /// The action ran and reported failure.
    #[error("action {action_id} failed: {reason}")]
    Failed { action_id: String, reason: String },

    /// The action did not finish within its timeout.
    #[error("action {action_id} timed out after {timeout_ms}ms")]
    TimedOut { action_id: String, timeout_ms: u64 },

    /// The executor has no handler for this action type.
    #[error("action {action_id} is not supported: {reason}")]
    Unsupported { action_id: String, reason: String },
}

impl ActionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionError::TimedOut { .. })
    }
}

/// Result type for action execution.
pub type ActionResult<T> = Result<T, ActionError>;
