//! # Swarm Orchestrator - Coordinated failure response
//!
//! The [`OrchestrationCoordinator`] is the single entry point for triggers.
//! For each one it creates an [`Orchestration`], scores the four
//! [`OrchestrationStrategy`] variants and runs the winner's components
//! against the subsystems it owns:
//!
//! - [`ResilienceRegistry`](swarm_resilience::ResilienceRegistry): breakers
//!   and failover for the resources an orchestration claims
//! - [`RecoveryWorkflowEngine`](swarm_recovery::RecoveryWorkflowEngine):
//!   scored recovery workflows
//! - [`SelfHealingEngine`](swarm_healing::SelfHealingEngine): scenario-based
//!   healing sessions
//!
//! Component failures lower an orchestration's effectiveness; they never
//! surface as errors. Admission is capped, concurrent orchestrations that
//! claim the same resource are ordered by the configured
//! [`ConflictPolicy`], and shutdown stops whatever is still running after a
//! grace period.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use swarm_orchestrator::{
//!     Collaborators, OrchestrationCoordinator, PassthroughDetector, SwarmConfig,
//! };
//! use swarm_resilience::StaticProber;
//! use swarm_types::{FixedMetricsSource, NoOpActionExecutor, Severity, TracingSink, Trigger};
//!
//! # async fn example() -> swarm_orchestrator::OrchestratorResult<()> {
//! let coordinator = Arc::new(OrchestrationCoordinator::new(
//!     SwarmConfig::default(),
//!     Collaborators {
//!         executor: Arc::new(NoOpActionExecutor),
//!         metrics: Arc::new(FixedMetricsSource::healthy()),
//!         sink: Arc::new(TracingSink),
//!         prober: Arc::new(StaticProber::new()),
//!         detector: Arc::new(PassthroughDetector),
//!     },
//! )?);
//!
//! let tick = coordinator.start_background();
//! let trigger = Trigger::new("agent_timeout", Severity::High, "agent").with_source("agent-3");
//! let orchestration = coordinator.orchestrate(trigger).await?;
//! println!("{} {:.2}", orchestration.status, orchestration.effectiveness());
//!
//! coordinator.shutdown().await;
//! let _ = tick.await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod error;
pub mod orchestration;
pub mod resources;
pub mod strategy;

pub use component::{ComponentExecution, ComponentKind, ComponentStatus};
pub use config::{ConflictPolicy, OrchestratorConfig, StatusTargets, StrategyWeights, SwarmConfig};
pub use coordinator::{
    Collaborators, CoordinatorStats, OrchestrationCoordinator, OrchestrationEvent,
};
pub use detection::{Complexity, DetectionProvider, DetectionReport, PassthroughDetector};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestration::{
    Orchestration, OrchestrationMetrics, OrchestrationOutcome, OrchestrationStatus,
};
pub use resources::{Claim, ConflictKind, ResourceConflict, ResourceLedger};
pub use strategy::{select_strategy, OrchestrationStrategy, SelectionInput, StrategyDecision, StrategyScore};
