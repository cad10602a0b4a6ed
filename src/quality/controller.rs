use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::breakpoint::DEFAULT_PROJECT;
use crate::config::QualityConfig;
use crate::sink::{LogRecord, LogSink, log_best_effort};

use super::history::{QualityHistory, QualityReport, QualityTrend};
use super::rules::RuleSource;
use super::stages::{calculate_quality_score, run_stages};
use super::structured::validate_structured;
use super::types::{QualityResult, ValidationStrategy};

/// Per-call options for [`QualityController::validate`].
#[derive(Debug, Clone, Default)]
pub struct QualityContext {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    /// Overrides the configured strategy for this call only.
    pub strategy: Option<ValidationStrategy>,
}

impl QualityContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ValidationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    fn project(&self) -> &str {
        self.project_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PROJECT)
    }
}

/// Quality gate over agent output.
///
/// Scoring and history updates happen under one lock; sink writes happen
/// after it is released.
pub struct QualityController {
    config: QualityConfig,
    rules: Option<Arc<dyn RuleSource>>,
    sink: Option<Arc<dyn LogSink>>,
    history: Mutex<QualityHistory>,
}

impl QualityController {
    pub fn new(config: QualityConfig) -> Self {
        let history = QualityHistory::new(config.max_history_per_project);
        Self {
            config,
            rules: None,
            sink: None,
            history: Mutex::new(history),
        }
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleSource>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub async fn validate(&self, output: &str, task: &str, context: &QualityContext) -> QualityResult {
        let project_id = context.project();
        let strategy = context.strategy.as_ref().unwrap_or(&self.config.strategy);

        let result = {
            let mut history = self.history.lock();
            let result = match strategy {
                ValidationStrategy::Unstructured => self.score_unstructured(output, task),
                ValidationStrategy::Structured {
                    schema,
                    rule_domains,
                } => {
                    let outcome = validate_structured(
                        output,
                        schema,
                        self.rules.as_deref(),
                        rule_domains,
                        &self.config,
                    );
                    let passes = outcome.overall >= self.config.min_score;
                    let mut result = QualityResult::new(
                        outcome.overall,
                        outcome.stage_scores,
                        passes,
                        outcome.improvements,
                        outcome.violations,
                    )
                    .with_metadata("schema", schema.name.as_str())
                    .with_metadata("missing_fields", outcome.missing_fields);
                    if let Some(error) = outcome.schema_error {
                        result = result.with_metadata("schema_error", error);
                    }
                    result
                }
            };
            let mut result = result
                .with_metadata("strategy", strategy.as_str())
                .with_metadata("project_id", project_id);
            if let Some(task_id) = &context.task_id {
                result = result.with_metadata("task_id", task_id.as_str());
            }
            history.record(project_id, result.clone());
            result
        };

        info!(
            project_id = %project_id,
            strategy = strategy.as_str(),
            score = result.overall_score,
            passes_gate = result.passes_gate,
            violations = result.rule_violations.len(),
            "Quality validation complete"
        );

        for violation in &result.rule_violations {
            log_best_effort(
                self.sink.as_deref(),
                LogRecord::RuleViolation {
                    project_id: project_id.to_string(),
                    task_id: context.task_id.clone(),
                    violation: violation.clone(),
                    recorded_at: result.timestamp,
                },
            )
            .await;
        }
        log_best_effort(
            self.sink.as_deref(),
            LogRecord::QualityResult {
                project_id: project_id.to_string(),
                task_id: context.task_id.clone(),
                result: result.clone(),
            },
        )
        .await;

        result
    }

    fn score_unstructured(&self, output: &str, task: &str) -> QualityResult {
        let reports = run_stages(output, task);
        let stage_scores: BTreeMap<String, f64> = reports
            .iter()
            .map(|r| (r.stage.as_str().to_string(), r.score))
            .collect();
        let overall = calculate_quality_score(&stage_scores, &self.config.weights);
        let passes = overall >= self.config.min_score;
        debug!(?stage_scores, overall, "Stage scores");

        let details: serde_json::Map<String, Value> = reports
            .iter()
            .map(|r| {
                let details = r.details.clone().into_iter().collect();
                (r.stage.as_str().to_string(), Value::Object(details))
            })
            .collect();
        let improvements = reports
            .into_iter()
            .flat_map(|r| r.improvements)
            .collect();

        QualityResult::new(overall, stage_scores, passes, improvements, Vec::new())
            .with_metadata("stage_details", Value::Object(details))
    }

    /// Results for a project, oldest first.
    pub fn history(&self, project_id: &str) -> Vec<QualityResult> {
        self.history.lock().results(project_id).cloned().collect()
    }

    pub fn trends(&self, project_id: &str, days: u32) -> QualityTrend {
        self.history.lock().trends(
            project_id,
            days,
            Utc::now(),
            self.config.trend_delta,
            self.config.min_trend_samples,
        )
    }

    pub fn report(&self, project_id: &str) -> QualityReport {
        self.history.lock().report(project_id, self.config.top_issues)
    }
}
