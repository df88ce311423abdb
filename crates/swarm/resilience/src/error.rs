//! Error types for swarm-resilience crate.
//!
//! Timeouts are a distinct variant so callers can count them separately
//! from generic failures.

use thiserror::Error;

use crate::circuit_breaker::CircuitState;

/// Errors raised by resilience primitives.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResilienceError {
    /// Breaker is open (or half-open with no probe slot left); the
    /// operation was not invoked.
    #[error("circuit {name} unavailable ({state})")]
    CircuitUnavailable { name: String, state: CircuitState },

    /// The protected operation returned an error.
    #[error("operation on {name} failed: {reason}")]
    OperationFailed { name: String, reason: String },

    /// The protected operation exceeded its timeout.
    #[error("operation on {name} timed out after {timeout_ms}ms")]
    OperationTimeout { name: String, timeout_ms: u64 },

    /// All slots and queue positions are taken.
    #[error("bulkhead full: {name}")]
    BulkheadFull { name: String },

    /// A queued operation waited past its timeout.
    #[error("bulkhead {name}: queued operation timed out after {waited_ms}ms")]
    QueueTimeout { name: String, waited_ms: u64 },

    /// No token became available within the allowed wait.
    #[error("rate limited: {name}, next token in {retry_after_ms}ms")]
    RateLimited { name: String, retry_after_ms: u64 },

    /// No endpoint is left to fail over to.
    #[error("failover group {group}: no endpoint available")]
    NoEndpointAvailable { group: String },

    /// Endpoint is not part of the failover group.
    #[error("failover group {group}: unknown endpoint {endpoint}")]
    UnknownEndpoint { group: String, endpoint: String },

    /// Failback refused, e.g. the primary is unhealthy.
    #[error("failover group {group}: failback refused: {reason}")]
    FailbackRefused { group: String, reason: String },

    /// Named instance does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// State persistence failed.
    #[error("state store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ResilienceError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ResilienceError::OperationTimeout { .. } | ResilienceError::QueueTimeout { .. }
        )
    }

    /// Rejections never invoked the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitUnavailable { .. }
                | ResilienceError::BulkheadFull { .. }
                | ResilienceError::RateLimited { .. }
        )
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
