//! # Swarm Healing - Multi-step self-healing scenarios
//!
//! A [`HealingScenario`] describes how to recognize a problem (regex,
//! metric threshold, structured event and time-window matchers) and how to
//! fix it: an ordered list of actions with dependencies, verification steps,
//! success criteria and best-effort rollback.
//!
//! The [`SelfHealingEngine`] scores every scenario against a trigger, asks
//! the [`HealingSafetyMonitor`] to admit the best qualifier and runs it as a
//! [`HealingSession`]:
//!
//! 1. Actions run in declared order. An action whose dependencies did not
//!    complete is skipped, never failed. A failing critical action (restart
//!    by default) aborts the phase.
//! 2. Verification steps run in order; a failing critical step fails the
//!    session.
//! 3. If any action ran, the engine waits out the stability period and
//!    probes health again.
//! 4. A failed session runs the scenario's rollback actions.

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod learning;
pub mod matcher;
pub mod safety;
pub mod scenario;
pub mod session;

pub use catalog::default_scenarios;
pub use config::{HealingConfig, HealingSafetyConfig, SelectionWeights};
pub use engine::{HealingEngineStats, SelfHealingEngine, ABANDONED_REASON};
pub use error::{HealingError, HealingResult};
pub use learning::{ScenarioLearning, ScenarioStats, DEFAULT_SCENARIO_SUCCESS_RATE};
pub use matcher::{selection_score, CompiledScenario, MatchInput, ScenarioMatch};
pub use safety::{HealingSafetyMonitor, HealingVeto};
pub use scenario::{
    HealingAction, HealingScenario, MatchField, SuccessCriteria, ThresholdOperator,
    TriggerMatcher, VerificationCheck, VerificationStep,
};
pub use session::{
    ActionExecution, ActionExecutionStatus, CriteriaEvaluation, HealingMetrics, HealingOutcome,
    HealingSession, RollbackExecution, SessionStatus, StabilityCheck, VerificationResult,
};
