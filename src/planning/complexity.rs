use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ComplexityConfig;
use crate::error::{OrchestratorError, Result};
use crate::sink::{LogRecord, LogSink, log_best_effort};

use super::advisory::{self, AdvisoryOutcome, AdvisorySource};
use super::decomposition::{materialize_subtasks, suggest_subtasks};
use super::estimate::{ComplexityEstimate, EstimateSource, EstimationContext};
use super::graph::plan_parallel_groups;
use super::heuristics::{self, HeuristicAnalysis};

/// Blended metrics before decomposition.
#[derive(Debug, Clone)]
struct Metrics {
    complexity_score: f64,
    estimated_tokens: u64,
    estimated_loc: u64,
    estimated_files: u32,
    estimated_duration_minutes: u32,
    confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatorStatistics {
    pub total_estimates: u64,
    pub decompositions_suggested: u64,
    pub advisory_successes: u64,
    pub advisory_failures: u64,
    pub mean_complexity: f64,
    pub calibration_samples: usize,
    /// Mean |estimated - actual| duration in minutes.
    pub mean_absolute_duration_error: Option<f64>,
}

#[derive(Debug, Default)]
struct EstimatorState {
    recent: VecDeque<(String, u32)>,
    total_estimates: u64,
    decompositions_suggested: u64,
    advisory_successes: u64,
    advisory_failures: u64,
    complexity_sum: f64,
    /// task id -> (estimated minutes, actual minutes)
    calibration: HashMap<String, (u32, u32)>,
}

/// Scores task complexity and proposes a decomposition plan.
///
/// All work for one estimate runs under a single lock. The only external
/// call made while holding it is the advisory request, which is bounded by
/// `advisory_timeout_secs` and degrades to heuristics on any failure.
pub struct ComplexityEstimator {
    config: ComplexityConfig,
    advisory: Option<Arc<dyn AdvisorySource>>,
    sink: Option<Arc<dyn LogSink>>,
    state: Mutex<EstimatorState>,
}

impl ComplexityEstimator {
    pub fn new(config: ComplexityConfig) -> Self {
        Self {
            config,
            advisory: None,
            sink: None,
            state: Mutex::new(EstimatorState::default()),
        }
    }

    pub fn with_advisory(mut self, source: Arc<dyn AdvisorySource>) -> Self {
        self.advisory = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ComplexityConfig {
        &self.config
    }

    pub async fn estimate(
        &self,
        task_id: &str,
        description: &str,
        context: &EstimationContext,
    ) -> ComplexityEstimate {
        let mut state = self.state.lock().await;

        let heuristic = heuristics::analyze(description, context, &self.config);
        debug!(
            task_id = %task_id,
            score = heuristic.complexity_score,
            loc = heuristic.estimated_loc,
            files = heuristic.estimated_files,
            effort = heuristic.effort.as_str(),
            "Heuristic pass complete"
        );

        let outcome = self.consult_advisory(description, context, &heuristic).await;
        match &outcome {
            AdvisoryOutcome::Assessed(_) => state.advisory_successes += 1,
            AdvisoryOutcome::Failed(_) => state.advisory_failures += 1,
            AdvisoryOutcome::Unavailable => {}
        }

        let metrics = self.combine(&heuristic, outcome.assessment());
        let (suggests_decomposition, verdict) = self.decide(&metrics, outcome.assessment());

        let mut suggested_subtasks = Vec::new();
        let mut subtasks = Vec::new();
        let mut plan = plan_parallel_groups(&mut []);
        let mut notes = Vec::new();
        if suggests_decomposition {
            suggested_subtasks = outcome
                .assessment()
                .map(|a| {
                    let kept: Vec<String> = a
                        .suggested_subtasks
                        .iter()
                        .map(|s| s.trim())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    let blank = a.suggested_subtasks.len() - kept.len();
                    if blank > 0 {
                        notes.push(format!("ignored {blank} blank advisory subtask(s)"));
                    }
                    kept
                })
                .filter(|s| s.len() >= 2)
                .unwrap_or_else(|| {
                    suggest_subtasks(
                        description,
                        context.task_type.as_deref(),
                        metrics.complexity_score,
                        metrics.estimated_loc,
                    )
                });
            match materialize_subtasks(
                task_id,
                &suggested_subtasks,
                metrics.complexity_score,
                metrics.estimated_duration_minutes,
            ) {
                Ok(mut built) => {
                    plan = plan_parallel_groups(&mut built);
                    subtasks = built;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Could not build subtasks");
                    notes.push(format!("subtasks not built: {e}"));
                }
            }
        }
        let mut plan_warnings = plan.warnings;
        plan_warnings.extend(notes);

        let rationale = self.rationale(&heuristic, &outcome, &metrics, &verdict);
        let estimate = ComplexityEstimate {
            task_id: task_id.to_string(),
            estimated_tokens: metrics.estimated_tokens,
            estimated_loc: metrics.estimated_loc,
            estimated_files: metrics.estimated_files,
            complexity_score: metrics.complexity_score,
            suggests_decomposition,
            suggestion_confidence: metrics.confidence,
            suggested_subtasks,
            suggested_parallel_groups: plan.groups,
            subtasks,
            speedup_factor: plan.speedup,
            parallel_efficiency: plan.efficiency,
            plan_warnings,
            estimated_duration_minutes: metrics.estimated_duration_minutes,
            rationale,
            source: if outcome.assessment().is_some() {
                EstimateSource::Blended
            } else {
                EstimateSource::Heuristic
            },
            timestamp: Utc::now(),
        };

        state.total_estimates += 1;
        state.complexity_sum += estimate.complexity_score;
        if estimate.suggests_decomposition {
            state.decompositions_suggested += 1;
        }
        state.recent.retain(|(id, _)| id != task_id);
        state
            .recent
            .push_back((task_id.to_string(), estimate.estimated_duration_minutes));
        while state.recent.len() > self.config.max_recent_estimates.max(1) {
            state.recent.pop_front();
        }
        drop(state);

        info!(
            task_id = %task_id,
            score = estimate.complexity_score,
            decompose = estimate.suggests_decomposition,
            subtasks = estimate.subtasks.len(),
            groups = estimate.suggested_parallel_groups.len(),
            speedup = estimate.speedup_factor,
            "Complexity estimate: {:.0}/100 ({})",
            estimate.complexity_score,
            if estimate.suggests_decomposition { "decompose" } else { "single task" }
        );

        log_best_effort(
            self.sink.as_deref(),
            LogRecord::ComplexityEstimate {
                estimate: estimate.clone(),
            },
        )
        .await;

        estimate
    }

    async fn consult_advisory(
        &self,
        description: &str,
        context: &EstimationContext,
        heuristic: &HeuristicAnalysis,
    ) -> AdvisoryOutcome {
        let Some(source) = &self.advisory else {
            return AdvisoryOutcome::Unavailable;
        };

        let prompt = advisory::build_prompt(description, context, heuristic);
        let timeout = self.config.advisory_timeout();
        let result = match tokio::time::timeout(timeout, source.generate(&prompt)).await {
            Ok(Ok(reply)) => advisory::parse_assessment(&reply),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OrchestratorError::AdvisoryTimeout(timeout)),
        };

        match result {
            Ok(assessment) => {
                debug!(
                    score = assessment.complexity_score,
                    confidence = assessment.confidence,
                    decompose = assessment.should_decompose,
                    "Advisory assessment received"
                );
                AdvisoryOutcome::Assessed(assessment)
            }
            Err(e) => {
                warn!(error = %e, "Advisory assessment failed, using heuristics only");
                AdvisoryOutcome::Failed(e)
            }
        }
    }

    fn combine(
        &self,
        heuristic: &HeuristicAnalysis,
        assessment: Option<&advisory::AdvisoryAssessment>,
    ) -> Metrics {
        let mut metrics = match assessment {
            None => Metrics {
                complexity_score: heuristic.complexity_score,
                estimated_tokens: heuristic.estimated_tokens,
                estimated_loc: heuristic.estimated_loc,
                estimated_files: heuristic.estimated_files,
                estimated_duration_minutes: heuristic.estimated_duration_minutes,
                confidence: heuristic.confidence,
            },
            Some(a) => {
                let wh = self.config.heuristic_weight;
                let wa = self.config.advisory_weight;
                let blend = |h: f64, a: f64| wh * h + wa * a;
                Metrics {
                    complexity_score: blend(heuristic.complexity_score, a.complexity_score),
                    estimated_tokens: blend(
                        heuristic.estimated_tokens as f64,
                        a.estimated_tokens as f64,
                    )
                    .round() as u64,
                    estimated_loc: blend(heuristic.estimated_loc as f64, a.estimated_loc as f64)
                        .round() as u64,
                    estimated_files: blend(
                        heuristic.estimated_files as f64,
                        a.estimated_files as f64,
                    )
                    .round() as u32,
                    estimated_duration_minutes: (blend(
                        heuristic.estimated_duration_minutes as f64,
                        a.estimated_duration_minutes as f64,
                    )
                    .round() as u32)
                        .max(self.config.min_duration_minutes),
                    confidence: blend(heuristic.confidence, a.confidence),
                }
            }
        };

        metrics.complexity_score = metrics.complexity_score.clamp(0.0, 100.0);
        let distance = (metrics.complexity_score - self.config.decomposition_threshold).abs();
        if distance <= self.config.ambiguity_band {
            metrics.confidence *= 1.0 - self.config.ambiguity_penalty;
        }
        metrics.confidence = metrics.confidence.clamp(0.0, 1.0);
        metrics
    }

    /// Returns the verdict and a short reason for it.
    fn decide(
        &self,
        metrics: &Metrics,
        assessment: Option<&advisory::AdvisoryAssessment>,
    ) -> (bool, String) {
        if let Some(a) = assessment
            && a.confidence >= self.config.advisory_override_confidence
        {
            let verdict = if a.should_decompose {
                "decomposition suggested"
            } else {
                "no decomposition needed"
            };
            return (
                a.should_decompose,
                format!(
                    "{verdict} by advisory judgment ({:.0}% confident)",
                    a.confidence * 100.0
                ),
            );
        }

        let c = &self.config;
        let mut exceeded = Vec::new();
        if metrics.complexity_score > c.decomposition_threshold {
            exceeded.push(format!(
                "score {:.0} > {:.0}",
                metrics.complexity_score, c.decomposition_threshold
            ));
        }
        if metrics.estimated_tokens > c.max_tokens {
            exceeded.push(format!("tokens {} > {}", metrics.estimated_tokens, c.max_tokens));
        }
        if metrics.estimated_files > c.max_files {
            exceeded.push(format!("files {} > {}", metrics.estimated_files, c.max_files));
        }
        if metrics.estimated_loc > c.max_loc {
            exceeded.push(format!("LOC {} > {}", metrics.estimated_loc, c.max_loc));
        }

        if exceeded.is_empty() {
            (false, "within all configured limits".to_string())
        } else {
            (
                true,
                format!("decomposition suggested: {}", exceeded.join(", ")),
            )
        }
    }

    fn rationale(
        &self,
        heuristic: &HeuristicAnalysis,
        outcome: &AdvisoryOutcome,
        metrics: &Metrics,
        verdict: &str,
    ) -> String {
        let mut rationale = format!(
            "Complexity {:.0}/100 (~{} LOC, {} files, {} min); {}. Heuristics: {}.",
            metrics.complexity_score,
            metrics.estimated_loc,
            metrics.estimated_files,
            metrics.estimated_duration_minutes,
            verdict,
            heuristic.factors.join(", ")
        );
        match outcome {
            AdvisoryOutcome::Assessed(a) if !a.reasoning.trim().is_empty() => {
                rationale.push_str(&format!(" Advisory: {}", a.reasoning.trim()));
            }
            AdvisoryOutcome::Failed(_) => {
                rationale.push_str(" Advisory judgment unavailable; heuristics only.");
            }
            _ => {}
        }
        rationale
    }

    /// Record how long a task actually took, for calibration statistics.
    pub async fn record_actual(&self, task_id: &str, actual_minutes: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let estimated = state
            .recent
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, minutes)| *minutes)
            .ok_or_else(|| {
                OrchestratorError::Validation(format!("no recent estimate for task {task_id}"))
            })?;
        state
            .calibration
            .insert(task_id.to_string(), (estimated, actual_minutes));
        debug!(task_id = %task_id, estimated, actual = actual_minutes, "Recorded actual duration");
        Ok(())
    }

    pub async fn statistics(&self) -> EstimatorStatistics {
        let state = self.state.lock().await;
        let samples = state.calibration.len();
        let mean_absolute_duration_error = (samples > 0).then(|| {
            state
                .calibration
                .values()
                .map(|(est, act)| (*est as f64 - *act as f64).abs())
                .sum::<f64>()
                / samples as f64
        });

        EstimatorStatistics {
            total_estimates: state.total_estimates,
            decompositions_suggested: state.decompositions_suggested,
            advisory_successes: state.advisory_successes,
            advisory_failures: state.advisory_failures,
            mean_complexity: if state.total_estimates == 0 {
                0.0
            } else {
                state.complexity_sum / state.total_estimates as f64
            },
            calibration_samples: samples,
            mean_absolute_duration_error,
        }
    }
}
