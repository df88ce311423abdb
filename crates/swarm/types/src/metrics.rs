//! Live system metrics as an abstract capability.
//!
//! The core never samples hosts itself. Engines read a [`MetricsSource`]
//! when they need load, health or per-component figures.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::trigger::Trigger;

/// Point-in-time view of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// CPU utilization (0.0-1.0).
    pub cpu: f64,

    /// Memory utilization (0.0-1.0).
    pub memory: f64,

    /// Network utilization (0.0-1.0).
    pub network: f64,

    /// Aggregate health (0.0-1.0).
    pub health_score: f64,

    /// Fraction of failing requests (0.0-1.0).
    pub error_rate: f64,

    /// Mean response time in milliseconds.
    pub response_time_ms: f64,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu: 0.3,
            memory: 0.4,
            network: 0.2,
            health_score: 0.95,
            error_rate: 0.01,
            response_time_ms: 120.0,
        }
    }
}

/// Provider of live metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current system-wide metrics.
    async fn system_metrics(&self) -> SystemMetrics;

    /// Health of a single component (0.0-1.0).
    async fn component_health(&self, component: &str) -> f64;

    /// Whether the condition that raised `trigger` is gone.
    async fn is_resolved(&self, trigger: &Trigger) -> bool;
}

/// Metrics source with values set by hand.
///
/// Components without an explicit value report the system health score.
/// Used by tests and by the daemon when no live source is wired in.
pub struct FixedMetricsSource {
    system: RwLock<SystemMetrics>,
    components: RwLock<HashMap<String, f64>>,
    unresolved: RwLock<Vec<String>>,
}

impl FixedMetricsSource {
    pub fn new(system: SystemMetrics) -> Self {
        Self {
            system: RwLock::new(system),
            components: RwLock::new(HashMap::new()),
            unresolved: RwLock::new(Vec::new()),
        }
    }

    /// A healthy, lightly loaded system.
    pub fn healthy() -> Self {
        Self::new(SystemMetrics::default())
    }

    pub fn set_health(&self, health_score: f64) {
        self.system.write().health_score = health_score;
    }

    pub fn set_load(&self, cpu: f64, memory: f64) {
        let mut system = self.system.write();
        system.cpu = cpu;
        system.memory = memory;
    }

    pub fn set_component_health(&self, component: impl Into<String>, health: f64) {
        self.components.write().insert(component.into(), health);
    }

    /// Keep reporting triggers of this type as unresolved.
    pub fn mark_unresolved(&self, trigger_type: impl Into<String>) {
        self.unresolved.write().push(trigger_type.into());
    }

    pub fn mark_resolved(&self, trigger_type: &str) {
        self.unresolved.write().retain(|t| t != trigger_type);
    }
}

impl Default for FixedMetricsSource {
    fn default() -> Self {
        Self::healthy()
    }
}

#[async_trait]
impl MetricsSource for FixedMetricsSource {
    async fn system_metrics(&self) -> SystemMetrics {
        self.system.read().clone()
    }

    async fn component_health(&self, component: &str) -> f64 {
        self.components
            .read()
            .get(component)
            .copied()
            .unwrap_or_else(|| self.system.read().health_score)
    }

    async fn is_resolved(&self, trigger: &Trigger) -> bool {
        !self.unresolved.read().contains(&trigger.trigger_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Severity;

    #[tokio::test]
    async fn test_fixed_source_component_fallback() {
        let source = FixedMetricsSource::healthy();
        source.set_health(0.9);
        source.set_component_health("db", 0.4);

        assert_eq!(source.component_health("db").await, 0.4);
        assert_eq!(source.component_health("cache").await, 0.9);
    }

    #[tokio::test]
    async fn test_fixed_source_resolution() {
        let source = FixedMetricsSource::healthy();
        let trigger = Trigger::new("disk_full", Severity::High, "storage");

        assert!(source.is_resolved(&trigger).await);
        source.mark_unresolved("disk_full");
        assert!(!source.is_resolved(&trigger).await);
        source.mark_resolved("disk_full");
        assert!(source.is_resolved(&trigger).await);
    }
}
