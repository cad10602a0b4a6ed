use std::sync::Arc;
use std::thread;

use pilot_orchestrator::breakpoint::{BreakpointManager, BreakpointType};
use pilot_orchestrator::config::{BreakpointConfig, ComplexityConfig, DecisionConfig, QualityConfig};
use pilot_orchestrator::decision::{
    ActionType, DecisionContext, DecisionEngine, Outcome, ValidationReport,
};
use pilot_orchestrator::planning::{ComplexityEstimator, EstimationContext};
use pilot_orchestrator::quality::{QualityContext, QualityController};
use serde_json::json;

const GOOD_OUTPUT: &str = r#"Implemented token validation for the session service.

```rust
/// Validate a bearer token and return the session.
pub fn validate_token(token: &str) -> Result<Session, AuthError> {
    let claims = decode_claims(token).map_err(AuthError::Decode)?;
    if claims.expired() {
        return Err(AuthError::Expired);
    }
    Ok(Session::from(claims))
}

#[test]
fn test_validate_token_rejects_empty() {
    assert!(validate_token("").is_err());
}

#[test]
fn test_validate_token_rejects_invalid_signature() {
    let result = validate_token("invalid.signature");
    assert!(matches!(result, Err(AuthError::Decode(_))));
}
```
"#;

fn engine() -> DecisionEngine {
    DecisionEngine::new(
        DecisionConfig::default(),
        Arc::new(BreakpointManager::new(BreakpointConfig::default())),
    )
}

fn strong(task_id: &str) -> DecisionContext {
    DecisionContext::for_task(task_id)
        .with_confidence(0.95)
        .with_quality_gate(true)
        .with_validation(ValidationReport::passed())
}

fn gate_failed(task_id: &str) -> DecisionContext {
    DecisionContext::for_task(task_id)
        .with_confidence(0.95)
        .with_quality(0.9, false)
        .with_validation(ValidationReport::passed())
}

#[test]
fn test_confident_passing_work_proceeds() {
    let engine = engine();
    let action = engine.decide(&strong("t-1"));

    assert_eq!(action.action_type, ActionType::Proceed);
    assert!(action.confidence >= 0.85, "{}", action.confidence);
    assert!(action.breakpoint_reason().is_none());
    assert_eq!(action.metadata["retry_count"], 0);
    assert!(action.metadata["signals"]["overall"].is_number());
}

#[test]
fn test_low_confidence_critical_task_escalates_via_breakpoint() {
    let engine = engine();
    let action = engine.decide(
        &DecisionContext::for_task("t-2")
            .with_confidence(0.20)
            .with_signal("critical_task", true),
    );

    assert_eq!(action.action_type, ActionType::Escalate);
    assert_eq!(action.breakpoint_reason(), Some("confidence_too_low"));
    assert_eq!(
        action.metadata["breakpoint_types"],
        json!(["confidence_too_low", "critical_task"])
    );
    assert_eq!(engine.statistics().breakpoint_escalations, 1);
}

#[test]
fn test_breakpoint_overrides_high_confidence() {
    let engine = engine();
    let action = engine.decide(&strong("t-3").with_signal("architecture_change", true));

    assert_eq!(action.action_type, ActionType::Escalate);
    assert_eq!(action.breakpoint_reason(), Some("architecture_decision"));
}

#[test]
fn test_escalation_without_breakpoints() {
    let engine = DecisionEngine::new(
        DecisionConfig::default(),
        Arc::new(BreakpointManager::new(BreakpointConfig {
            enabled: false,
            ..BreakpointConfig::default()
        })),
    );
    let action = engine.decide(&DecisionContext::new().with_confidence(0.2));

    assert_eq!(action.action_type, ActionType::Escalate);
    assert!(action.breakpoint_reason().is_none());
    assert_eq!(engine.statistics().breakpoint_escalations, 0);
}

#[test]
fn test_moderate_confidence_asks_for_clarification() {
    let engine = engine();
    let action = engine.decide(
        &DecisionContext::for_task("t-4")
            .with_confidence(0.9)
            .with_quality(0.6, false)
            .with_validation(ValidationReport {
                complete: true,
                valid: false,
                issues: vec!["missing error path".into()],
            }),
    );

    assert_eq!(action.action_type, ActionType::Clarify);
    let ambiguities = action.ambiguities();
    assert!(ambiguities.iter().any(|a| a.contains("invalid")));
    assert!(ambiguities.iter().any(|a| a.contains("0.60")));
}

#[test]
fn test_repeated_retries_hit_consecutive_failure_breakpoint() {
    let engine = engine();

    for attempt in 1..=3 {
        let action = engine.decide(&gate_failed("t-5"));
        assert_eq!(action.action_type, ActionType::Retry);
        assert!(action.explanation.contains("quality gate not passed"));
        assert_eq!(engine.retry_count("t-5"), attempt);
    }

    let action = engine.decide(&gate_failed("t-5"));
    assert_eq!(action.action_type, ActionType::Escalate);
    assert_eq!(action.breakpoint_reason(), Some("consecutive_failures"));

    engine.learn_from_outcome(ActionType::Retry, &Outcome::success().for_task("t-5"));
    assert_eq!(engine.retry_count("t-5"), 0);
    assert_eq!(engine.decide(&gate_failed("t-5")).action_type, ActionType::Retry);

    assert_eq!(engine.statistics().total_retries, 4);
}

#[test]
fn test_retry_counters_are_per_task() {
    let engine = engine();
    engine.decide(&gate_failed("a"));
    engine.decide(&gate_failed("a"));
    engine.decide(&gate_failed("b"));

    assert_eq!(engine.retry_count("a"), 2);
    assert_eq!(engine.retry_count("b"), 1);

    engine.decide(&strong("a"));
    assert_eq!(engine.retry_count("a"), 0);
    assert_eq!(engine.retry_count("b"), 1);
}

#[test]
fn test_failures_drive_success_rate_down() {
    let engine = engine();
    for _ in 0..60 {
        engine.learn_from_outcome(ActionType::Proceed, &Outcome::failure());
    }
    let rate = engine.success_rate(ActionType::Proceed);
    assert!(rate < 0.01, "{rate}");
    assert!(rate >= 0.0);

    for _ in 0..60 {
        engine.learn_from_outcome(ActionType::Clarify, &Outcome::success());
    }
    assert!(engine.success_rate(ActionType::Clarify) > 0.99);
    assert_eq!(engine.statistics().outcomes_recorded, 120);
}

#[test]
fn test_learned_history_lowers_confidence() {
    let engine = engine();
    let before = engine.decide(&strong("t-6")).confidence;
    for _ in 0..30 {
        engine.learn_from_outcome(ActionType::Proceed, &Outcome::failure());
    }
    let after = engine.decide(&strong("t-6")).confidence;
    assert!(after < before);
}

#[test]
fn test_checkpoint_every_interval() {
    let engine = DecisionEngine::new(
        DecisionConfig {
            checkpoint_interval: 2,
            ..DecisionConfig::default()
        },
        Arc::new(BreakpointManager::new(BreakpointConfig::default())),
    );
    let kinds: Vec<ActionType> = (0..4).map(|_| engine.decide(&strong("t")).action_type).collect();
    assert_eq!(
        kinds,
        vec![
            ActionType::Proceed,
            ActionType::Checkpoint,
            ActionType::Proceed,
            ActionType::Checkpoint,
        ]
    );
    assert!(kinds.iter().all(ActionType::continues_autonomously));
}

#[test]
fn test_default_interval_proceeds_nine_times_before_checkpoint() {
    let engine = engine();
    assert_eq!(engine.config().checkpoint_interval, 10);

    for i in 0..9 {
        let action = engine.decide(&strong(&format!("t-{i}")));
        assert_eq!(action.action_type, ActionType::Proceed, "decision {i}");
    }
    let tenth = engine.decide(&strong("t-9"));
    assert_eq!(tenth.action_type, ActionType::Checkpoint);
    assert!(tenth.confidence >= 0.85);
    assert_eq!(engine.decide(&strong("t-10")).action_type, ActionType::Proceed);
}

#[test]
fn test_zero_interval_always_proceeds() {
    let engine = DecisionEngine::new(
        DecisionConfig {
            checkpoint_interval: 0,
            ..DecisionConfig::default()
        },
        Arc::new(BreakpointManager::new(BreakpointConfig::default())),
    );
    assert!((0..25).all(|_| engine.decide(&strong("t")).action_type == ActionType::Proceed));
}

#[test]
fn test_escalation_feeds_shared_breakpoint_manager() {
    let manager = Arc::new(BreakpointManager::new(BreakpointConfig::default()));
    let engine = DecisionEngine::new(DecisionConfig::default(), manager.clone());

    let ctx = strong("t-7")
        .with_project("shop")
        .with_signal("architecture_change", true);
    let action = engine.decide(&ctx);
    let reason = BreakpointType::custom(action.breakpoint_reason().unwrap());

    let event = engine
        .breakpoints()
        .trigger(&reason, ctx.breakpoint_context(action.confidence, 0))
        .unwrap();
    assert_eq!(event.project_id, "shop");
    assert_eq!(manager.pending_events("shop").len(), 1);

    manager.resolve(&event.id, json!({"approved": true})).unwrap();
    let next = engine.decide(&strong("t-7").with_project("shop"));
    assert_eq!(next.action_type, ActionType::Proceed);
}

#[test]
fn test_concurrent_decisions_share_state() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    engine.decide(&gate_failed(&format!("task-{i}")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = engine.statistics();
    assert_eq!(stats.total_decisions, 200);
    assert_eq!(stats.history_len, 200);
    let escalations = stats.per_action.get(&ActionType::Escalate).copied().unwrap_or(0);
    assert_eq!(stats.per_action[&ActionType::Retry] + escalations, 200);
    assert_eq!(stats.total_retries, 8 * 3);
}

#[tokio::test]
async fn test_pipeline_from_estimate_to_decision() {
    let estimator = ComplexityEstimator::new(ComplexityConfig::default());
    let estimate = estimator
        .estimate(
            "auth",
            "implement user authentication with JWT, 4 files",
            &EstimationContext::new(),
        )
        .await;
    let subtask = &estimate.subtasks[0];

    let controller = QualityController::new(QualityConfig::default());
    let quality = controller
        .validate(
            GOOD_OUTPUT,
            "validate session token",
            &QualityContext::for_project("shop").with_task_id(subtask.id.as_str()),
        )
        .await;
    assert!(quality.passes_gate);

    let engine = engine();
    let base = DecisionContext::for_task(subtask.id.as_str())
        .with_project("shop")
        .with_confidence(0.95)
        .with_quality_result(&quality)
        .with_validation(ValidationReport::passed());

    let plain = engine.decide(&base);
    assert_eq!(plain.action_type, ActionType::Proceed);

    let weighted = engine.decide(&base.clone().with_complexity(estimate.complexity_score));
    assert!(weighted.confidence < plain.confidence);
}
