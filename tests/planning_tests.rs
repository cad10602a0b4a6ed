mod fixtures;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fixtures::mock_advisor::{MockAdvisor, ResponseScenario, assessment_reply};
use fixtures::recording_sink::RecordingSink;
use pilot_orchestrator::config::ComplexityConfig;
use pilot_orchestrator::planning::{
    ComplexityEstimator, EstimateSource, EstimationContext, Phase, SubTask, SubTaskStatus,
    plan_parallel_groups, ready_subtasks,
};

const JWT_TASK: &str = "implement user authentication with JWT, 4 files";

fn subtask(id: &str, minutes: u32, deps: &[&str]) -> SubTask {
    SubTask::new(id, "parent", format!("work on {id}"))
        .unwrap()
        .with_duration(minutes)
        .with_dependencies(deps.iter().copied())
        .unwrap()
}

fn assert_levels_respect_dependencies(subtasks: &[SubTask]) {
    let levels: HashMap<&str, u32> = subtasks
        .iter()
        .filter_map(|s| s.parallel_group.map(|g| (s.id.as_str(), g)))
        .collect();
    for st in subtasks {
        let Some(level) = st.parallel_group else {
            continue;
        };
        for dep in &st.dependencies {
            let dep_level = levels[dep.as_str()];
            assert!(
                dep_level < level,
                "{} (level {level}) depends on {dep} (level {dep_level})",
                st.id
            );
        }
    }
}

// ========== Estimation ==========

#[tokio::test]
async fn test_jwt_task_decomposes_with_design_first() {
    let estimator = ComplexityEstimator::new(ComplexityConfig::default());
    let estimate = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new())
        .await;

    assert!(estimate.suggests_decomposition);
    assert!(estimate.suggested_subtasks.len() >= 3);
    assert_eq!(estimate.subtasks.len(), estimate.suggested_subtasks.len());
    assert!(!estimate.rationale.is_empty());
    assert!((0.0..=100.0).contains(&estimate.complexity_score));

    let first = &estimate.suggested_parallel_groups[0];
    let design_id = &estimate.subtasks[0].id;
    assert_eq!(Phase::classify(&estimate.subtasks[0].description), Phase::Design);
    assert!(first.subtask_ids.contains(design_id));

    let implementation = estimate
        .subtasks
        .iter()
        .find(|s| Phase::classify(&s.description) == Phase::Implementation)
        .expect("implementation subtask");
    assert!(implementation.dependencies.contains(design_id));
    assert!(implementation.parallel_group > estimate.subtasks[0].parallel_group);

    assert_levels_respect_dependencies(&estimate.subtasks);
    assert!(estimate.speedup_factor >= 1.0);
    assert!(estimate.parallel_efficiency > 0.0 && estimate.parallel_efficiency <= 1.0);
}

#[tokio::test]
async fn test_simple_task_stays_single() {
    let estimator = ComplexityEstimator::new(ComplexityConfig::default());
    let estimate = estimator
        .estimate("typo", "fix typo in README", &EstimationContext::new())
        .await;

    assert!(!estimate.suggests_decomposition);
    assert!(estimate.subtasks.is_empty());
    assert!(estimate.suggested_parallel_groups.is_empty());
    assert_eq!(estimate.speedup_factor, 1.0);
}

#[tokio::test]
async fn test_explicit_files_raise_estimate() {
    let estimator = ComplexityEstimator::new(ComplexityConfig::default());
    let bare = estimator
        .estimate("a", "update the settings page", &EstimationContext::new())
        .await;
    let scoped = estimator
        .estimate(
            "b",
            "update the settings page",
            &EstimationContext::new().with_files((0..12).map(|i| format!("src/page_{i}.rs"))),
        )
        .await;

    assert!(scoped.estimated_files >= bare.estimated_files);
    assert!(scoped.complexity_score >= bare.complexity_score);
}

// ========== Advisory ==========

#[tokio::test]
async fn test_advisory_subtasks_replace_templates() {
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::static_response(
        assessment_reply(
            85.0,
            true,
            0.9,
            &[
                "Design the token format and signing keys",
                "Implement token issuing on login",
                "Implement verification middleware",
                "Test the login and refresh flow",
            ],
        ),
    )));
    let estimator =
        ComplexityEstimator::new(ComplexityConfig::default()).with_advisory(advisor.clone());

    let estimate = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new().with_task_type("feature"))
        .await;

    advisor.assert_called(1);
    let prompt = advisor.last_prompt().unwrap();
    assert!(prompt.contains("JWT"));
    assert!(prompt.contains("feature"));

    assert_eq!(estimate.source, EstimateSource::Blended);
    assert!(estimate.rationale.contains("touches several layers"));
    assert_eq!(estimate.suggested_subtasks.len(), 4);
    assert_eq!(estimate.suggested_parallel_groups.len(), 3);
    assert_eq!(estimate.suggested_parallel_groups[1].subtask_ids.len(), 2);
    assert!(estimate.suggested_parallel_groups[1].parallelizable);
    assert!(estimate.speedup_factor > 1.0);
    assert_levels_respect_dependencies(&estimate.subtasks);
}

#[tokio::test]
async fn test_blank_advisory_subtasks_are_ignored() {
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::static_response(
        assessment_reply(
            85.0,
            true,
            0.9,
            &[
                "Design the token format",
                "   ",
                "Implement token issuing",
                "",
                "Test the login flow",
            ],
        ),
    )));
    let estimator = ComplexityEstimator::new(ComplexityConfig::default()).with_advisory(advisor);

    let estimate = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new())
        .await;

    assert_eq!(
        estimate.suggested_subtasks,
        vec![
            "Design the token format".to_string(),
            "Implement token issuing".to_string(),
            "Test the login flow".to_string(),
        ]
    );
    assert_eq!(estimate.subtasks.len(), 3);
    assert!(!estimate.suggested_parallel_groups.is_empty());
    assert!(
        estimate.plan_warnings.iter().any(|w| w.contains("ignored 2 blank")),
        "{:?}",
        estimate.plan_warnings
    );
}

#[tokio::test]
async fn test_mostly_blank_advisory_subtasks_fall_back_to_templates() {
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::static_response(
        assessment_reply(85.0, true, 0.9, &["Implement everything", " ", "\t"]),
    )));
    let estimator = ComplexityEstimator::new(ComplexityConfig::default()).with_advisory(advisor);

    let estimate = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new().with_task_type("feature"))
        .await;

    assert!(estimate.suggested_subtasks.len() >= 2);
    assert_eq!(estimate.subtasks.len(), estimate.suggested_subtasks.len());
    assert_eq!(Phase::classify(&estimate.subtasks[0].description), Phase::Design);
    assert!(estimate.plan_warnings.iter().any(|w| w.contains("ignored 2 blank")));
}

#[tokio::test]
async fn test_failing_advisory_keeps_heuristics() {
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::failing("rate limited")));
    let estimator =
        ComplexityEstimator::new(ComplexityConfig::default()).with_advisory(advisor.clone());

    let with_failure = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new())
        .await;
    let heuristic_only = ComplexityEstimator::new(ComplexityConfig::default())
        .estimate("auth", JWT_TASK, &EstimationContext::new())
        .await;

    assert_eq!(with_failure.source, EstimateSource::Heuristic);
    assert_eq!(with_failure.complexity_score, heuristic_only.complexity_score);
    assert_eq!(
        with_failure.suggests_decomposition,
        heuristic_only.suggests_decomposition
    );
    assert!(with_failure.rationale.contains("heuristics only"));

    let stats = estimator.statistics().await;
    assert_eq!(stats.advisory_failures, 1);
    assert_eq!(stats.advisory_successes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_advisory_times_out() {
    let mut config = ComplexityConfig::default();
    config.advisory_timeout_secs = 1;
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::slow(
        Duration::from_secs(30),
        assessment_reply(10.0, false, 0.95, &[]),
    )));
    let estimator = ComplexityEstimator::new(config).with_advisory(advisor.clone());

    let estimate = estimator
        .estimate("auth", JWT_TASK, &EstimationContext::new())
        .await;

    advisor.assert_called(1);
    assert_eq!(estimate.source, EstimateSource::Heuristic);
    assert!(estimate.suggests_decomposition);
    assert_eq!(estimator.statistics().await.advisory_failures, 1);
}

#[tokio::test]
async fn test_sequential_advisory_replies() {
    let advisor = Arc::new(MockAdvisor::new(ResponseScenario::sequential(vec![
        "not json at all".to_string(),
        assessment_reply(30.0, false, 0.95, &[]),
    ])));
    let estimator =
        ComplexityEstimator::new(ComplexityConfig::default()).with_advisory(advisor.clone());

    let first = estimator
        .estimate("a", JWT_TASK, &EstimationContext::new())
        .await;
    let second = estimator
        .estimate("b", JWT_TASK, &EstimationContext::new())
        .await;

    assert_eq!(first.source, EstimateSource::Heuristic);
    assert_eq!(second.source, EstimateSource::Blended);
    assert!(!second.suggests_decomposition);

    let stats = estimator.statistics().await;
    assert_eq!(stats.total_estimates, 2);
    assert_eq!(stats.advisory_successes, 1);
    assert_eq!(stats.advisory_failures, 1);
}

// ========== Sink ==========

#[tokio::test]
async fn test_estimates_written_to_sink() {
    let sink = Arc::new(RecordingSink::new());
    let estimator = ComplexityEstimator::new(ComplexityConfig::default()).with_sink(sink.clone());

    estimator
        .estimate("a", "fix typo in README", &EstimationContext::new())
        .await;
    estimator
        .estimate("b", JWT_TASK, &EstimationContext::new())
        .await;

    assert_eq!(sink.count("complexity_estimate"), 2);
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_estimate() {
    let sink = Arc::new(RecordingSink::failing());
    let estimator = ComplexityEstimator::new(ComplexityConfig::default()).with_sink(sink.clone());

    let estimate = estimator
        .estimate("a", JWT_TASK, &EstimationContext::new())
        .await;

    assert!(estimate.suggests_decomposition);
    assert_eq!(sink.attempts(), 1);
    assert!(sink.records().is_empty());
}

// ========== Parallel planning ==========

#[test]
fn test_wide_graph_levels() {
    let mut tasks = vec![
        subtask("schema", 20, &[]),
        subtask("api", 40, &["schema"]),
        subtask("ui", 30, &["schema"]),
        subtask("jobs", 25, &["schema"]),
        subtask("e2e", 15, &["api", "ui"]),
        subtask("docs", 10, &["api"]),
    ];
    let plan = plan_parallel_groups(&mut tasks);

    assert_eq!(plan.groups.len(), 3);
    assert_eq!(plan.groups[0].subtask_ids, vec!["schema"]);
    assert_eq!(plan.groups[1].subtask_ids, vec!["api", "ui", "jobs"]);
    assert_eq!(plan.groups[2].subtask_ids, vec!["e2e", "docs"]);
    assert_eq!(plan.sequential_minutes, 140);
    assert_eq!(plan.parallel_minutes, 20 + 40 + 15);
    assert!(plan.speedup > 1.0);
    assert!(plan.unscheduled.is_empty());
    assert_levels_respect_dependencies(&tasks);

    let total: usize = plan.groups.iter().map(|g| g.subtask_ids.len()).sum();
    assert_eq!(total, tasks.len());
}

#[test]
fn test_cycle_excluded_and_reported() {
    let mut tasks = vec![
        subtask("a", 10, &[]),
        subtask("b", 10, &["a", "c"]),
        subtask("c", 10, &["b"]),
        subtask("d", 10, &["c"]),
    ];
    let plan = plan_parallel_groups(&mut tasks);

    assert_eq!(plan.groups.len(), 1);
    assert_eq!(plan.groups[0].subtask_ids, vec!["a"]);
    assert_eq!(plan.unscheduled, vec!["b", "c", "d"]);
    assert!(plan.warnings.iter().any(|w| w.contains("Circular dependency")));
    assert!(tasks[3].parallel_group.is_none());
}

#[test]
fn test_ready_subtasks_follow_completion() {
    let mut tasks = vec![
        subtask("design", 10, &[]),
        subtask("build", 20, &["design"]),
        subtask("test", 10, &["build"]),
    ];
    let plan = plan_parallel_groups(&mut tasks);

    let ready: Vec<&str> = ready_subtasks(&tasks).iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ready, vec!["design"]);
    assert_eq!(plan.next_group(&tasks).unwrap().level, 0);

    tasks[0].start(Some("agent-1".into())).unwrap();
    assert!(ready_subtasks(&tasks).is_empty());
    tasks[0].complete().unwrap();
    assert_eq!(tasks[0].status(), SubTaskStatus::Completed);

    let ready: Vec<&str> = ready_subtasks(&tasks).iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ready, vec!["build"]);
    assert_eq!(plan.next_group(&tasks).unwrap().level, 1);

    assert!(tasks[0].start(None).is_err());
}
