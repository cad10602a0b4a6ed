use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::breakpoint::{BreakpointType, MAX_AUTO_RESOLVE_WAIT_SECS};
use crate::error::{OrchestratorError, Result};
use crate::quality::ValidationStrategy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub complexity: ComplexityConfig,
    pub breakpoints: BreakpointConfig,
    pub quality: QualityConfig,
    pub decision: DecisionConfig,
}

impl OrchestratorConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.complexity.collect_errors(&mut errors);
        self.breakpoints.collect_errors(&mut errors);
        self.quality.collect_errors(&mut errors);
        self.decision.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(errors.join("; ")))
        }
    }
}

fn check_ratio(value: f64, name: &str, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{name} must be between 0.0 and 1.0, got {value}"));
    }
}

/// Complexity estimation and decomposition thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    /// Complexity score above which decomposition is suggested.
    pub decomposition_threshold: f64,
    pub max_tokens: u64,
    pub max_files: u32,
    pub max_loc: u64,
    /// Share of the heuristic pass when blending with advisory judgment.
    pub heuristic_weight: f64,
    pub advisory_weight: f64,
    /// Advisory self-confidence at or above which its decomposition verdict wins.
    pub advisory_override_confidence: f64,
    /// Distance from the threshold (in score points) treated as ambiguous.
    pub ambiguity_band: f64,
    /// Fractional confidence reduction inside the ambiguous band.
    pub ambiguity_penalty: f64,
    pub advisory_timeout_secs: u64,
    pub min_duration_minutes: u32,
    pub loc_per_minute: f64,
    /// Estimates retained for statistics and calibration.
    pub max_recent_estimates: usize,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            decomposition_threshold: 60.0,
            max_tokens: 8000,
            max_files: 5,
            max_loc: 500,
            heuristic_weight: 0.4,
            advisory_weight: 0.6,
            advisory_override_confidence: 0.7,
            ambiguity_band: 10.0,
            ambiguity_penalty: 0.2,
            advisory_timeout_secs: 30,
            min_duration_minutes: 15,
            loc_per_minute: 5.0,
            max_recent_estimates: 500,
        }
    }
}

impl ComplexityConfig {
    pub fn advisory_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.advisory_timeout_secs)
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if !(0.0..=100.0).contains(&self.decomposition_threshold) {
            errors.push("complexity.decomposition_threshold must be between 0 and 100".into());
        }
        check_ratio(self.heuristic_weight, "complexity.heuristic_weight", errors);
        check_ratio(self.advisory_weight, "complexity.advisory_weight", errors);
        if (self.heuristic_weight + self.advisory_weight - 1.0).abs() > 1e-6 {
            errors.push("complexity.heuristic_weight + advisory_weight must equal 1.0".into());
        }
        check_ratio(
            self.advisory_override_confidence,
            "complexity.advisory_override_confidence",
            errors,
        );
        check_ratio(self.ambiguity_penalty, "complexity.ambiguity_penalty", errors);
        if self.ambiguity_band < 0.0 {
            errors.push("complexity.ambiguity_band must not be negative".into());
        }
        if self.advisory_timeout_secs == 0 {
            errors.push("complexity.advisory_timeout_secs must be greater than 0".into());
        }
        if self.loc_per_minute <= 0.0 {
            errors.push("complexity.loc_per_minute must be greater than 0".into());
        }
        if self.max_tokens == 0 || self.max_files == 0 || self.max_loc == 0 {
            errors.push("complexity ceilings (max_tokens, max_files, max_loc) must be greater than 0".into());
        }
    }
}

/// Breakpoint rule thresholds and runtime switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    pub enabled: bool,
    /// Rule types switched off at startup.
    pub disabled: Vec<BreakpointType>,
    pub rate_limit_wait_secs: u64,
    pub time_threshold_minutes: f64,
    pub min_confidence: f64,
    pub max_consecutive_failures: u32,
    pub critical_confidence: f64,
    pub min_breaking_tests: u32,
    pub min_conflicting_solutions: u32,
    pub min_solution_agreement: f64,
    /// Per-variable overrides merged into every rule's thresholds.
    pub threshold_overrides: HashMap<String, f64>,
}

impl Default for BreakpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled: Vec::new(),
            rate_limit_wait_secs: 60,
            time_threshold_minutes: 30.0,
            min_confidence: 0.3,
            max_consecutive_failures: 3,
            critical_confidence: 0.9,
            min_breaking_tests: 1,
            min_conflicting_solutions: 2,
            min_solution_agreement: 0.5,
            threshold_overrides: HashMap::new(),
        }
    }
}

impl BreakpointConfig {
    fn collect_errors(&self, errors: &mut Vec<String>) {
        check_ratio(self.min_confidence, "breakpoints.min_confidence", errors);
        check_ratio(self.critical_confidence, "breakpoints.critical_confidence", errors);
        check_ratio(self.min_solution_agreement, "breakpoints.min_solution_agreement", errors);
        if self.time_threshold_minutes <= 0.0 {
            errors.push("breakpoints.time_threshold_minutes must be greater than 0".into());
        }
        if self.max_consecutive_failures == 0 {
            errors.push("breakpoints.max_consecutive_failures must be greater than 0".into());
        }
        if self.rate_limit_wait_secs > MAX_AUTO_RESOLVE_WAIT_SECS {
            errors.push(format!(
                "breakpoints.rate_limit_wait_secs must be at most {MAX_AUTO_RESOLVE_WAIT_SECS}"
            ));
        }
        if self.threshold_overrides.keys().any(|k| k.trim().is_empty()) {
            errors.push("breakpoints.threshold_overrides keys must not be empty".into());
        }
    }
}

/// Stage weights for the unstructured quality pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeights {
    pub syntax: f64,
    pub requirements: f64,
    pub quality: f64,
    pub testing: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            syntax: 0.20,
            requirements: 0.30,
            quality: 0.30,
            testing: 0.20,
        }
    }
}

impl StageWeights {
    pub fn total(&self) -> f64 {
        self.syntax + self.requirements + self.quality + self.testing
    }
}

/// Points deducted per rule violation, by severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityDeductions {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeverityDeductions {
    fn default() -> Self {
        Self {
            critical: 0.30,
            high: 0.20,
            medium: 0.10,
            low: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub strategy: ValidationStrategy,
    pub weights: StageWeights,
    /// Minimum overall score for the quality gate.
    pub min_score: f64,
    pub deductions: SeverityDeductions,
    pub compliance_weight: f64,
    pub completeness_weight: f64,
    /// Overall score assigned when structured output fails schema parsing.
    pub schema_failure_score: f64,
    pub max_history_per_project: usize,
    pub trend_delta: f64,
    pub min_trend_samples: usize,
    pub top_issues: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            strategy: ValidationStrategy::Unstructured,
            weights: StageWeights::default(),
            min_score: 0.70,
            deductions: SeverityDeductions::default(),
            compliance_weight: 0.6,
            completeness_weight: 0.4,
            schema_failure_score: 0.1,
            max_history_per_project: 10_000,
            trend_delta: 0.05,
            min_trend_samples: 5,
            top_issues: 5,
        }
    }
}

impl QualityConfig {
    fn collect_errors(&self, errors: &mut Vec<String>) {
        let w = &self.weights;
        if [w.syntax, w.requirements, w.quality, w.testing]
            .iter()
            .any(|v| *v < 0.0)
        {
            errors.push("quality.weights must not be negative".into());
        }
        if w.total() <= 0.0 {
            errors.push("quality.weights must not all be zero".into());
        }
        check_ratio(self.min_score, "quality.min_score", errors);
        let d = &self.deductions;
        if [d.critical, d.high, d.medium, d.low].iter().any(|v| *v < 0.0) {
            errors.push("quality.deductions must not be negative".into());
        }
        if !(d.critical >= d.high && d.high >= d.medium && d.medium >= d.low) {
            errors.push("quality.deductions must be ordered critical >= high >= medium >= low".into());
        }
        check_ratio(self.compliance_weight, "quality.compliance_weight", errors);
        check_ratio(self.completeness_weight, "quality.completeness_weight", errors);
        check_ratio(self.schema_failure_score, "quality.schema_failure_score", errors);
        if self.max_history_per_project == 0 {
            errors.push("quality.max_history_per_project must be greater than 0".into());
        }
        if self.min_trend_samples < 2 {
            errors.push("quality.min_trend_samples must be at least 2".into());
        }
    }
}

/// Signal weights for the decision confidence blend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub validation: f64,
    pub quality: f64,
    pub confidence: f64,
    pub history: f64,
    /// Only counted when the context carries a complexity score.
    pub complexity: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            validation: 0.25,
            quality: 0.25,
            confidence: 0.35,
            history: 0.05,
            complexity: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub weights: SignalWeights,
    pub learning_rate: f64,
    pub initial_success_rate: f64,
    pub max_history: usize,
    /// Every Nth proceed becomes a checkpoint; 0 disables checkpoints.
    pub checkpoint_interval: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            high_confidence: 0.85,
            medium_confidence: 0.50,
            weights: SignalWeights::default(),
            learning_rate: 0.1,
            initial_success_rate: 0.5,
            max_history: 1000,
            checkpoint_interval: 10,
        }
    }
}

impl DecisionConfig {
    fn collect_errors(&self, errors: &mut Vec<String>) {
        check_ratio(self.high_confidence, "decision.high_confidence", errors);
        check_ratio(self.medium_confidence, "decision.medium_confidence", errors);
        if self.medium_confidence >= self.high_confidence {
            errors.push("decision.medium_confidence must be less than high_confidence".into());
        }
        let w = &self.weights;
        if [w.validation, w.quality, w.confidence, w.history, w.complexity]
            .iter()
            .any(|v| *v < 0.0)
        {
            errors.push("decision.weights must not be negative".into());
        }
        if w.validation + w.quality + w.confidence + w.history > 1.0 + 1e-6 {
            errors.push("decision.weights (excluding complexity) must sum to at most 1.0".into());
        }
        if w.validation + w.quality + w.confidence + w.history <= 0.0 {
            errors.push("decision.weights must not all be zero".into());
        }
        check_ratio(self.learning_rate, "decision.learning_rate", errors);
        check_ratio(self.initial_success_rate, "decision.initial_success_rate", errors);
        if self.max_history == 0 {
            errors.push("decision.max_history must be greater than 0".into());
        }
    }
}
