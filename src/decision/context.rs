use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breakpoint::ContextMap;
use crate::quality::QualityResult;

/// Validation verdict reported by the surrounding system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub complete: bool,
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn passed() -> Self {
        Self {
            complete: true,
            valid: true,
            issues: Vec::new(),
        }
    }

    pub fn passes(&self) -> bool {
        self.complete && self.valid
    }
}

/// Input to one decision. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionContext {
    pub task_id: Option<String>,
    pub project_id: Option<String>,
    /// Raw agent response text.
    pub response: Option<String>,
    /// Caller-reported confidence in `[0, 1]`.
    pub confidence_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub quality_gate_passed: Option<bool>,
    pub validation: Option<ValidationReport>,
    /// Task complexity in `[0, 100]`.
    pub complexity_score: Option<f64>,
    /// Extra breakpoint variables such as `critical_task` or `elapsed_minutes`.
    pub signals: ContextMap,
}

impl DecisionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    pub fn with_quality(mut self, score: f64, gate_passed: bool) -> Self {
        self.quality_score = Some(score);
        self.quality_gate_passed = Some(gate_passed);
        self
    }

    pub fn with_quality_gate(mut self, gate_passed: bool) -> Self {
        self.quality_gate_passed = Some(gate_passed);
        self
    }

    pub fn with_quality_result(self, result: &QualityResult) -> Self {
        self.with_quality(result.overall_score, result.passes_gate)
    }

    pub fn with_validation(mut self, validation: ValidationReport) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_complexity(mut self, complexity_score: f64) -> Self {
        self.complexity_score = Some(complexity_score);
        self
    }

    pub fn with_signal(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.signals.insert(name.into(), value.into());
        self
    }

    /// Variables seen by breakpoint rules.
    ///
    /// Typed fields override same-named signals. `confidence_score` is the
    /// caller's value when given, otherwise `computed_confidence`.
    /// `consecutive_failures` defaults to the task's retry count.
    pub fn breakpoint_context(&self, computed_confidence: f64, retry_count: u32) -> ContextMap {
        let mut ctx = self.signals.clone();
        let mut set = |key: &str, value: Value| {
            ctx.insert(key.to_string(), value);
        };

        set(
            "confidence_score",
            Value::from(self.confidence_score.unwrap_or(computed_confidence)),
        );
        set("retry_count", Value::from(retry_count));
        if let Some(task_id) = &self.task_id {
            set("task_id", Value::from(task_id.as_str()));
        }
        if let Some(project_id) = &self.project_id {
            set("project_id", Value::from(project_id.as_str()));
        }
        if let Some(score) = self.quality_score {
            set("quality_score", Value::from(score));
        }
        if let Some(passed) = self.quality_gate_passed {
            set("quality_gate_passed", Value::from(passed));
        }
        if let Some(validation) = &self.validation {
            set("validation_complete", Value::from(validation.complete));
            set("validation_valid", Value::from(validation.valid));
        }
        if let Some(score) = self.complexity_score {
            set("complexity_score", Value::from(score));
        }

        ctx.entry("consecutive_failures")
            .or_insert_with(|| Value::from(retry_count));
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_breakpoint_context_prefers_caller_confidence() {
        let ctx = DecisionContext::for_task("t-1")
            .with_confidence(0.2)
            .with_signal("critical_task", true)
            .breakpoint_context(0.8, 2);

        assert_eq!(ctx["confidence_score"], json!(0.2));
        assert_eq!(ctx["critical_task"], json!(true));
        assert_eq!(ctx["consecutive_failures"], json!(2));
        assert_eq!(ctx["task_id"], json!("t-1"));
    }

    #[test]
    fn test_explicit_consecutive_failures_kept() {
        let ctx = DecisionContext::new()
            .with_signal("consecutive_failures", 5)
            .breakpoint_context(0.5, 0);
        assert_eq!(ctx["consecutive_failures"], json!(5));
        assert_eq!(ctx["confidence_score"], json!(0.5));
    }

    #[test]
    fn test_deserialize_minimal_context() {
        let ctx: DecisionContext = serde_json::from_value(json!({
            "confidence_score": 0.9,
            "validation": {"complete": true, "valid": false}
        }))
        .unwrap();
        assert_eq!(ctx.confidence_score, Some(0.9));
        assert!(!ctx.validation.unwrap().passes());
    }
}
