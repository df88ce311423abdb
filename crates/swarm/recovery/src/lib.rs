//! # Swarm Recovery - Scored recovery workflows
//!
//! Turns a [`Trigger`](swarm_types::Trigger) into a [`Workflow`]: the
//! engine scores every matching [`RecoveryStrategy`], asks the
//! [`SafetyMonitor`] to approve the best candidates in order, runs the
//! chosen strategy's actions through the
//! [`ActionExecutor`](swarm_types::ActionExecutor) hook and verifies the
//! result against live metrics.
//!
//! ## Scoring
//!
//! [`score_strategy`] is deterministic. It adds a severity table, the
//! historical success rate, load and timing adjustments to a base score,
//! then scales the sum down for recent failures and cooldown.
//!
//! ## Execution
//!
//! Actions run strictly in order. The first failing action triggers its own
//! rollback chain (bounded by `max_rollback_depth`) and ends the attempt.
//! A completed attempt only counts as a success when the originating error
//! is resolved and system and component health are above their thresholds.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarm_recovery::{RecoveryConfig, RecoveryWorkflowEngine};
//! use swarm_types::{FixedMetricsSource, NoOpActionExecutor, Severity, TracingSink, Trigger};
//!
//! # async fn example() -> swarm_recovery::RecoveryResult<()> {
//! let engine = RecoveryWorkflowEngine::new(
//!     RecoveryConfig::default(),
//!     Arc::new(NoOpActionExecutor),
//!     Arc::new(FixedMetricsSource::healthy()),
//!     Arc::new(TracingSink),
//! )?;
//!
//! let trigger = Trigger::new("agent_timeout", Severity::Medium, "agent");
//! let workflow = engine.recover(&trigger).await?;
//! println!("{} -> {}", workflow.strategy.id, workflow.status);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod learning;
pub mod safety;
pub mod scoring;
pub mod strategy;
pub mod workflow;

pub use catalog::{default_strategies, SOURCE_TARGET};
pub use config::{RecoveryConfig, SafetyConfig, ScoringConfig, SeverityTable, VerificationConfig};
pub use context::{is_business_hours, PriorAttempt, RecoveryContext, TimeConstraints};
pub use engine::{
    CandidateEvaluation, RecoveryEngineStats, RecoveryWorkflowEngine, StrategySelection,
    ABANDONED_REASON,
};
pub use error::{RecoveryError, RecoveryResult};
pub use learning::{LearningEngine, StrategyStats, DEFAULT_SUCCESS_RATE};
pub use safety::{SafetyMonitor, Veto};
pub use scoring::{score_strategy, ScoreBreakdown};
pub use strategy::{MatchCondition, RecoveryStrategy, StrategyType};
pub use workflow::{
    ActionRecord, Attempt, AttemptStatus, RollbackStep, VerificationOutcome, Workflow,
    WorkflowStatus,
};
