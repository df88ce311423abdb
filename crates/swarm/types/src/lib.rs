//! # Swarm Types - Shared vocabulary of the recovery core
//!
//! Types every swarm crate speaks:
//!
//! - [`Trigger`] / [`TriggerDraft`]: errors and early warnings entering the core
//! - [`Action`] / [`ActionExecutor`]: remediation steps and the hook that runs them
//! - [`MetricsSource`]: live system metrics as an abstract capability
//! - [`CompletionRecord`] / [`SystemStatusReport`] / [`MonitoringSink`]: output
//!   towards the monitoring subsystem
//! - [`BoundedHistory`]: capped completed-entity history
//!
//! Test doubles ([`NoOpActionExecutor`], [`SimulatedActionExecutor`],
//! [`FixedMetricsSource`], [`MemorySink`]) live here so every crate can
//! exercise its engines without real infrastructure.

#![deny(unsafe_code)]

pub mod action;
pub mod duration_ms;
pub mod error;
pub mod history;
pub mod ids;
pub mod metrics;
pub mod report;
pub mod trigger;

pub use action::{
    execute_with_timeout, Action, ActionExecutor, ActionReport, ActionType, NoOpActionExecutor,
    SimulatedActionExecutor, SOURCE_TARGET,
};
pub use error::{ActionError, ActionResult};
pub use history::BoundedHistory;
pub use ids::{AttemptId, OrchestrationId, SessionId, TriggerId, WorkflowId};
pub use metrics::{FixedMetricsSource, MetricsSource, SystemMetrics};
pub use report::{
    CompletionRecord, EntityKind, MemorySink, MonitoringSink, RefusalRecord, ResourceUtilization,
    SystemStatusReport, TargetAchievement, TracingSink,
};
pub use trigger::{Severity, Trigger, TriggerDraft};
