//! End-to-end recovery scenarios.

use std::sync::Arc;

use swarm_recovery::{
    MatchCondition, RecoveryConfig, RecoveryError, RecoveryStrategy, RecoveryWorkflowEngine,
    SafetyConfig, StrategyType, WorkflowStatus,
};
use swarm_types::{
    Action, ActionType, EntityKind, FixedMetricsSource, MemorySink, Severity,
    SimulatedActionExecutor, Trigger,
};

fn engine_with(
    strategies: Vec<RecoveryStrategy>,
    safety: SafetyConfig,
    executor: SimulatedActionExecutor,
) -> (RecoveryWorkflowEngine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = RecoveryWorkflowEngine::new(
        RecoveryConfig {
            strategies,
            safety,
            ..Default::default()
        },
        Arc::new(executor),
        Arc::new(FixedMetricsSource::healthy()),
        sink.clone(),
    )
    .unwrap();
    (engine, sink)
}

#[tokio::test]
async fn agent_timeout_single_restart_resolves() {
    let restart = RecoveryStrategy::new(
        "restart-agent",
        StrategyType::Standard,
        MatchCondition::any().error_types(["agent_timeout"]),
        vec![Action::new("restart", ActionType::Restart, "agent-3")],
    );
    let (engine, sink) = engine_with(
        vec![restart],
        SafetyConfig::default(),
        SimulatedActionExecutor::new(),
    );

    let trigger = Trigger::new("agent_timeout", Severity::Medium, "agent");
    let workflow = engine.recover(&trigger).await.unwrap();

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert!(workflow.success);
    assert!(workflow.error_resolved());

    let records = sink.completions_for(EntityKind::Workflow);
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].component_success.get("restart"), Some(&true));
}

#[tokio::test]
async fn default_catalog_routes_critical_corruption_to_emergency() {
    let (engine, _sink) = engine_with(
        vec![],
        SafetyConfig::default(),
        SimulatedActionExecutor::new(),
    );
    let trigger = Trigger::new("data_corruption", Severity::Critical, "storage")
        .with_source("ledger-db");

    let context = engine.build_context(&trigger).await;
    let selection = engine.select_strategy(&context).unwrap();

    assert_eq!(selection.strategy.id, "emergency-mitigate");
    // aggressive-failover also matches but ranks below
    assert!(selection.candidates.len() >= 2);

    let workflow = engine.recover(&trigger).await.unwrap();
    assert!(workflow.success);
    assert_eq!(workflow.attempts[0].actions[0].target, "ledger-db");
}

#[tokio::test]
async fn emergency_only_trigger_without_emergency_strategy_is_vetoed() {
    let (engine, sink) = engine_with(
        vec![RecoveryStrategy::new(
            "standard-any",
            StrategyType::Standard,
            MatchCondition::any(),
            vec![Action::new("restart", ActionType::Restart, "svc")],
        )],
        SafetyConfig::default(),
        SimulatedActionExecutor::new(),
    );

    let trigger = Trigger::new("security_breach", Severity::High, "security");
    match engine.recover(&trigger).await {
        Err(RecoveryError::NoSafeStrategy { vetoes, .. }) => {
            assert_eq!(vetoes.len(), 1);
            assert!(vetoes[0].contains("emergency"));
        }
        other => panic!("expected veto, got {:?}", other),
    }
    assert!(sink.completions().is_empty());
}

#[tokio::test]
async fn failing_source_gets_quarantined() {
    let (engine, _sink) = engine_with(
        vec![RecoveryStrategy::new(
            "restart-any",
            StrategyType::Standard,
            MatchCondition::any(),
            vec![Action::new("restart", ActionType::Restart, "svc")],
        )
        .with_max_retries(10)],
        SafetyConfig {
            quarantine_after_failures: 2,
            max_cascading_failures: 50,
            ..Default::default()
        },
        SimulatedActionExecutor::new().fail_action("restart"),
    );

    let from_flaky = || Trigger::new("agent_timeout", Severity::Medium, "agent").with_source("flaky");
    engine.recover(&from_flaky()).await.unwrap();
    engine.recover(&from_flaky()).await.unwrap();

    assert!(matches!(
        engine.recover(&from_flaky()).await,
        Err(RecoveryError::NoSafeStrategy { .. })
    ));

    let other = Trigger::new("agent_timeout", Severity::Medium, "agent").with_source("steady");
    assert!(engine.recover(&other).await.is_ok());
}
