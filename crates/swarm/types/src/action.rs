//! Remediation actions and the abstract hook that performs them.
//!
//! The core never restarts, scales or fails over anything itself. It hands
//! an [`Action`] to an [`ActionExecutor`] and applies its own timeout
//! around the call.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ActionError, ActionResult};
use crate::trigger::Trigger;

/// Kind of remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Restart,
    Scale,
    Rollback,
    Retry,
    Failover,
    Mitigate,
    Custom,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::Restart => "restart",
            ActionType::Scale => "scale",
            ActionType::Rollback => "rollback",
            ActionType::Retry => "retry",
            ActionType::Failover => "failover",
            ActionType::Mitigate => "mitigate",
            ActionType::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// Action target replaced by the trigger's source at execution time.
pub const SOURCE_TARGET: &str = "@source";

fn default_action_timeout() -> Duration {
    Duration::from_secs(30)
}

/// A single remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,

    #[serde(rename = "type")]
    pub action_type: ActionType,

    /// Component, agent or endpoint the action applies to.
    pub target: String,

    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    #[serde(
        rename = "timeout_ms",
        with = "crate::duration_ms",
        default = "default_action_timeout"
    )]
    pub timeout: Duration,

    /// Compensating action run when this one fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_action: Option<Box<Action>>,

    /// Ids of actions that must have completed first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type,
            target: target.into(),
            parameters: HashMap::new(),
            timeout: default_action_timeout(),
            rollback_action: None,
            prerequisites: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rollback(mut self, rollback: Action) -> Self {
        self.rollback_action = Some(Box::new(rollback));
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_prerequisite(mut self, id: impl Into<String>) -> Self {
        self.prerequisites.push(id.into());
        self
    }

    /// Copy of this action with a [`SOURCE_TARGET`] target bound to the
    /// trigger's source.
    pub fn resolved_for(&self, trigger: &Trigger) -> Action {
        let mut action = self.clone();
        if action.target == SOURCE_TARGET {
            action.target = trigger.source.clone();
        }
        action
    }

    /// Length of the rollback chain hanging off this action.
    pub fn rollback_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.rollback_action.as_deref();
        while let Some(action) = current {
            depth += 1;
            current = action.rollback_action.as_deref();
        }
        depth
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.id, self.action_type, self.target)
    }
}

/// What an executor reports back for a successful action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

impl ActionReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: HashMap::new(),
        }
    }
}

/// Hook that performs actions against real infrastructure.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action raised on behalf of `trigger`.
    async fn execute(&self, action: &Action, trigger: &Trigger) -> ActionResult<ActionReport>;

    /// Execute an action, giving up after `action.timeout`. Executors that
    /// enforce the deadline themselves override this.
    async fn execute_bounded(
        &self,
        action: &Action,
        trigger: &Trigger,
    ) -> ActionResult<ActionReport> {
        match tokio::time::timeout(action.timeout, self.execute(action, trigger)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::TimedOut {
                action_id: action.id.clone(),
                timeout_ms: action.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Run an action through an executor, bounded by the action's timeout.
pub async fn execute_with_timeout(
    executor: &dyn ActionExecutor,
    action: &Action,
    trigger: &Trigger,
) -> ActionResult<ActionReport> {
    executor.execute_bounded(action, trigger).await
}

/// Executor that accepts every action without doing anything.
pub struct NoOpActionExecutor;

#[async_trait]
impl ActionExecutor for NoOpActionExecutor {
    async fn execute(&self, action: &Action, _trigger: &Trigger) -> ActionResult<ActionReport> {
        debug!(action = %action, "No-op executing action");
        Ok(ActionReport::new(format!("{} accepted", action.id)))
    }
}

/// Executor with scripted failures and delays, recording every call.
#[derive(Default)]
pub struct SimulatedActionExecutor {
    fail_ids: HashSet<String>,
    fail_types: HashSet<ActionType>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the action with this id.
    pub fn fail_action(mut self, id: impl Into<String>) -> Self {
        self.fail_ids.insert(id.into());
        self
    }

    /// Fail every action of this type.
    pub fn fail_type(mut self, action_type: ActionType) -> Self {
        self.fail_types.insert(action_type);
        self
    }

    /// Sleep before answering for the action with this id.
    pub fn delay_action(mut self, id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(id.into(), delay);
        self
    }

    /// Ids of executed actions in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many times the action with this id was executed.
    pub fn call_count(&self, id: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == id).count()
    }
}

#[async_trait]
impl ActionExecutor for SimulatedActionExecutor {
    async fn execute(&self, action: &Action, _trigger: &Trigger) -> ActionResult<ActionReport> {
        self.calls.lock().push(action.id.clone());

        if let Some(delay) = self.delays.get(&action.id) {
            tokio::time::sleep(*delay).await;
        }

        if self.fail_ids.contains(&action.id) || self.fail_types.contains(&action.action_type) {
            return Err(ActionError::Failed {
                action_id: action.id.clone(),
                reason: format!("Simulated failure for action: {}", action),
            });
        }

        Ok(ActionReport::new(format!("{} completed", action.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Severity;

    fn trigger() -> Trigger {
        Trigger::new("agent_timeout", Severity::Medium, "agent")
    }

    #[test]
    fn test_rollback_depth() {
        let action = Action::new("restart", ActionType::Restart, "agent-1").with_rollback(
            Action::new("undo", ActionType::Rollback, "agent-1")
                .with_rollback(Action::new("undo-2", ActionType::Rollback, "agent-1")),
        );
        assert_eq!(action.rollback_depth(), 2);
        assert_eq!(Action::new("a", ActionType::Retry, "x").rollback_depth(), 0);
    }

    #[test]
    fn test_action_deserializes_timeout_ms() {
        let action: Action = serde_json::from_str(
            r#"{"id":"r1","type":"restart","target":"agent-1","timeout_ms":500}"#,
        )
        .unwrap();
        assert_eq!(action.timeout, Duration::from_millis(500));
        assert!(action.rollback_action.is_none());
    }

    #[test]
    fn test_source_target_resolution() {
        let trigger = trigger().with_source("agent-7");
        let bound =
            Action::new("restart", ActionType::Restart, SOURCE_TARGET).resolved_for(&trigger);
        assert_eq!(bound.target, "agent-7");

        let fixed = Action::new("restart", ActionType::Restart, "db").resolved_for(&trigger);
        assert_eq!(fixed.target, "db");
    }

    #[tokio::test]
    async fn test_simulated_executor_failures_and_calls() {
        let executor = SimulatedActionExecutor::new()
            .fail_action("bad")
            .fail_type(ActionType::Scale);

        let ok = Action::new("good", ActionType::Restart, "a");
        let bad = Action::new("bad", ActionType::Restart, "a");
        let scale = Action::new("scale", ActionType::Scale, "a");

        assert!(executor.execute(&ok, &trigger()).await.is_ok());
        assert!(executor.execute(&bad, &trigger()).await.is_err());
        assert!(executor.execute(&scale, &trigger()).await.is_err());
        assert_eq!(executor.calls(), vec!["good", "bad", "scale"]);
        assert_eq!(executor.call_count("bad"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout() {
        let executor =
            SimulatedActionExecutor::new().delay_action("slow", Duration::from_secs(10));
        let action =
            Action::new("slow", ActionType::Restart, "a").with_timeout(Duration::from_secs(1));

        let err = execute_with_timeout(&executor, &action, &trigger())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
