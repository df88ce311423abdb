//! Error types for swarm-healing crate.

use swarm_types::SessionId;
use thiserror::Error;

/// Errors raised by the self-healing engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HealingError {
    /// No scenario scored at or above the match threshold.
    #[error("no healing scenario matches trigger {trigger_id} ({trigger_type})")]
    NoMatchingScenario {
        trigger_id: String,
        trigger_type: String,
    },

    /// Every qualifying scenario was vetoed.
    #[error("healing vetoed for trigger {trigger_id}: {}", vetoes.join("; "))]
    Vetoed {
        trigger_id: String,
        vetoes: Vec<String>,
    },

    /// Concurrent session cap reached.
    #[error("healing concurrency exhausted: {active}/{limit} sessions active")]
    ConcurrencyExhausted { active: usize, limit: usize },

    #[error("healing session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session was cancelled while it ran.
    #[error("healing session {session_id} cancelled: {reason}")]
    Cancelled {
        session_id: SessionId,
        reason: String,
    },

    /// Scenario definition is malformed.
    #[error("invalid scenario {scenario_id}: {reason}")]
    InvalidScenario { scenario_id: String, reason: String },

    /// A pattern matcher does not compile.
    #[error("invalid pattern in scenario {scenario_id}: {pattern}: {reason}")]
    InvalidPattern {
        scenario_id: String,
        pattern: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for healing operations.
pub type HealingResult<T> = Result<T, HealingError>;
