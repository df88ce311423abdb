//! Named recovery components an orchestration is composed of.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Detection,
    Planning,
    Recovery,
    Resilience,
    Monitoring,
    SelfHealing,
    Verification,
}

impl ComponentKind {
    /// Completing one of these resolves the error.
    pub fn is_recovery_type(self) -> bool {
        matches!(self, ComponentKind::Recovery | ComponentKind::SelfHealing)
    }

    /// Completing one of these shows the system stabilized.
    pub fn is_monitoring_type(self) -> bool {
        matches!(self, ComponentKind::Monitoring | ComponentKind::Verification)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Detection => "detection",
            ComponentKind::Planning => "planning",
            ComponentKind::Recovery => "recovery",
            ComponentKind::Resilience => "resilience",
            ComponentKind::Monitoring => "monitoring",
            ComponentKind::SelfHealing => "self_healing",
            ComponentKind::Verification => "verification",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Completed,
    Failed,
}

/// One run of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentExecution {
    pub component: ComponentKind,
    pub status: ComponentStatus,
    /// Exceeded the coordinator's default timeout. Also counted as failed.
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub detail: String,
    /// Workflow or session the component spawned.
    pub spawned: Option<String>,
}

impl ComponentExecution {
    pub fn completed(&self) -> bool {
        self.status == ComponentStatus::Completed
    }
}

/// What a component reports back before timing is attached.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ComponentOutcome {
    pub success: bool,
    pub detail: String,
    pub spawned: Option<String>,
}

impl ComponentOutcome {
    pub fn new(success: bool, detail: impl Into<String>) -> Self {
        Self {
            success,
            detail: detail.into(),
            spawned: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self::new(false, detail)
    }

    pub fn spawned(mut self, id: impl fmt::Display) -> Self {
        self.spawned = Some(id.to_string());
        self
    }
}
