//! Detection capability used by the `detection` component.
//!
//! Anomaly detection itself lives outside the core. The coordinator only
//! needs an analysis of a trigger it already holds: how severe the problem
//! really is, how complex, and which components it touches.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_types::{Severity, Trigger};

use crate::error::OrchestratorResult;

/// How involved a problem looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// Analysis of one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub severity: Severity,
    pub complexity: Complexity,
    pub affected_components: Vec<String>,
    pub confidence: f64,
    /// False when the report was synthesized after detection failed.
    pub detected: bool,
}

impl DetectionReport {
    /// Report used when detection failed: the trigger's own severity and
    /// medium complexity.
    pub fn fallback(trigger: &Trigger) -> Self {
        Self {
            severity: trigger.severity,
            complexity: Complexity::Medium,
            affected_components: trigger.affected_components(),
            confidence: trigger.confidence,
            detected: false,
        }
    }
}

/// Analyses triggers for the coordinator.
#[async_trait]
pub trait DetectionProvider: Send + Sync {
    async fn detect(&self, trigger: &Trigger) -> OrchestratorResult<DetectionReport>;
}

/// Derives the report from the trigger itself.
///
/// Severity is taken as-is. Complexity comes from a `complexity` context
/// entry when present, otherwise from the number of affected components.
pub struct PassthroughDetector;

#[async_trait]
impl DetectionProvider for PassthroughDetector {
    async fn detect(&self, trigger: &Trigger) -> OrchestratorResult<DetectionReport> {
        let affected = trigger.affected_components();
        let complexity = match trigger.context_str("complexity") {
            Some("low") => Complexity::Low,
            Some("medium") => Complexity::Medium,
            Some("high") => Complexity::High,
            _ => match affected.len() {
                0 => Complexity::Low,
                1 | 2 => Complexity::Medium,
                _ => Complexity::High,
            },
        };

        Ok(DetectionReport {
            severity: trigger.severity,
            complexity,
            affected_components: affected,
            confidence: trigger.confidence,
            detected: true,
        })
    }
}
