//! Triggers: error reports and predictive early warnings entering the core.
//!
//! A trigger is produced upstream by the detection subsystem and is never
//! mutated here. Operators can submit a partially filled [`TriggerDraft`],
//! which is completed with defaults before it enters the pipeline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TriggerId;

/// Severity of a trigger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank: low=0 .. critical=3.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }

    /// Absolute distance between two severities in ranks.
    pub fn gap(self, other: Severity) -> u8 {
        self.rank().abs_diff(other.rank())
    }

    pub fn is_urgent(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// An error or early-warning event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,

    /// Error type, e.g. `agent_timeout`.
    #[serde(rename = "type")]
    pub trigger_type: String,

    pub severity: Severity,

    pub category: String,

    pub message: String,

    pub timestamp: DateTime<Utc>,

    /// Component or agent that raised the trigger.
    pub source: String,

    /// Detector confidence (0.0-1.0).
    pub confidence: f64,

    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,

    /// Early warning rather than an observed failure.
    #[serde(default)]
    pub predictive: bool,
}

impl Trigger {
    /// Create a trigger with default metadata.
    pub fn new(
        trigger_type: impl Into<String>,
        severity: Severity,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: TriggerId::generate(),
            trigger_type: trigger_type.into(),
            severity,
            category: category.into(),
            message: String::new(),
            timestamp: Utc::now(),
            source: "unknown".to_string(),
            confidence: 1.0,
            context: HashMap::new(),
            predictive: false,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn predictive(mut self) -> Self {
        self.predictive = true;
        self
    }

    /// Read a numeric context value.
    pub fn context_f64(&self, key: &str) -> Option<f64> {
        self.context.get(key).and_then(|v| v.as_f64())
    }

    /// Read a string context value.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    /// Components named in the `affected_components` context entry.
    pub fn affected_components(&self) -> Vec<String> {
        self.context
            .get("affected_components")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A partially specified trigger submitted by an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerDraft {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub trigger_type: Option<String>,
    pub severity: Option<Severity>,
    pub category: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub confidence: Option<f64>,
    pub context: HashMap<String, serde_json::Value>,
    pub predictive: bool,
}

impl TriggerDraft {
    /// Complete the draft. Manual triggers default to `manual` type and
    /// source with full confidence.
    pub fn into_trigger(self) -> Trigger {
        Trigger {
            id: self.id.map(TriggerId::new).unwrap_or_else(TriggerId::generate),
            trigger_type: self.trigger_type.unwrap_or_else(|| "manual".to_string()),
            severity: self.severity.unwrap_or_default(),
            category: self.category.unwrap_or_else(|| "general".to_string()),
            message: self
                .message
                .unwrap_or_else(|| "Manually submitted trigger".to_string()),
            timestamp: Utc::now(),
            source: self.source.unwrap_or_else(|| "manual".to_string()),
            confidence: self.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            context: self.context,
            predictive: self.predictive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_gap() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Low.gap(Severity::Critical), 3);
        assert_eq!(Severity::High.gap(Severity::Medium), 1);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
    }

    #[test]
    fn test_trigger_json_shape() {
        let json = r#"{
            "id": "t-1",
            "type": "agent_timeout",
            "severity": "medium",
            "category": "agent",
            "message": "agent 7 stopped responding",
            "timestamp": "2024-05-01T10:00:00Z",
            "source": "agent-7",
            "confidence": 0.9,
            "context": {"affected_components": ["agent-7", "queue"]}
        }"#;
        let trigger: Trigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.trigger_type, "agent_timeout");
        assert!(!trigger.predictive);
        assert_eq!(trigger.affected_components(), vec!["agent-7", "queue"]);
    }

    #[test]
    fn test_draft_defaults() {
        let trigger = TriggerDraft {
            severity: Some(Severity::High),
            ..Default::default()
        }
        .into_trigger();
        assert_eq!(trigger.trigger_type, "manual");
        assert_eq!(trigger.source, "manual");
        assert_eq!(trigger.severity, Severity::High);
        assert_eq!(trigger.confidence, 1.0);
    }
}
