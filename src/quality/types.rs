use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{SeverityDeductions, StageWeights};
use crate::error::Result;

pub const NO_IMPROVEMENTS: &str = "No improvements needed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn deduction(&self, deductions: &SeverityDeductions) -> f64 {
        match self {
            Self::Critical => deductions.critical,
            Self::High => deductions.high,
            Self::Medium => deductions.medium,
            Self::Low => deductions.low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Syntax,
    Requirements,
    Quality,
    Testing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Self::Syntax, Self::Requirements, Self::Quality, Self::Testing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Requirements => "requirements",
            Self::Quality => "quality",
            Self::Testing => "testing",
        }
    }

    pub fn weight(&self, weights: &StageWeights) -> f64 {
        match self {
            Self::Syntax => weights.syntax,
            Self::Requirements => weights.requirements,
            Self::Quality => weights.quality,
            Self::Testing => weights.testing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one unstructured validation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub score: f64,
    pub details: BTreeMap<String, Value>,
    pub improvements: Vec<String>,
}

impl StageReport {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            stage,
            score: 0.0,
            details: BTreeMap::new(),
            improvements: Vec::new(),
        }
    }

    pub(crate) fn detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub(crate) fn suggest(&mut self, improvement: impl Into<String>) {
        self.improvements.push(improvement.into());
    }

    pub(crate) fn finish(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }
}

/// Expected shape of a structured agent reply.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSchema {
    pub name: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_optional<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Derive required and optional top-level fields from a JSON schema.
    pub fn for_type<T: JsonSchema>() -> Result<Self> {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;

        let required: Vec<String> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let optional = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .keys()
                    .filter(|k| !required.contains(k))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let name = schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("response")
            .to_string();

        Ok(Self {
            name,
            required,
            optional,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(String::as_str)
    }
}

/// Validation path, selected per controller or per call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ValidationStrategy {
    #[default]
    Unstructured,
    Structured {
        schema: ResponseSchema,
        /// Rule domains checked for compliance; empty means every domain.
        #[serde(default)]
        rule_domains: Vec<String>,
    },
}

impl ValidationStrategy {
    pub fn structured(schema: ResponseSchema) -> Self {
        Self::Structured {
            schema,
            rule_domains: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstructured => "unstructured",
            Self::Structured { .. } => "structured",
        }
    }
}

/// Outcome of one validation call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub overall_score: f64,
    pub stage_scores: BTreeMap<String, f64>,
    pub passes_gate: bool,
    pub improvements: Vec<String>,
    pub rule_violations: Vec<RuleViolation>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl QualityResult {
    pub fn new(
        overall_score: f64,
        stage_scores: BTreeMap<String, f64>,
        passes_gate: bool,
        mut improvements: Vec<String>,
        rule_violations: Vec<RuleViolation>,
    ) -> Self {
        if improvements.is_empty() {
            improvements.push(NO_IMPROVEMENTS.to_string());
        }
        Self {
            overall_score: overall_score.clamp(0.0, 1.0),
            stage_scores,
            passes_gate,
            improvements,
            rule_violations,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn needs_improvement(&self) -> bool {
        self.improvements.iter().any(|i| i != NO_IMPROVEMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct ReviewReply {
        verdict: String,
        findings: Vec<String>,
        notes: Option<String>,
    }

    #[test]
    fn test_schema_from_type() {
        let schema = ResponseSchema::for_type::<ReviewReply>().unwrap();
        assert_eq!(schema.name, "ReviewReply");
        assert!(schema.required.contains(&"verdict".to_string()));
        assert!(schema.required.contains(&"findings".to_string()));
        assert_eq!(schema.optional, vec!["notes".to_string()]);
    }

    #[test]
    fn test_empty_improvements_become_placeholder() {
        let result = QualityResult::new(1.4, BTreeMap::new(), true, vec![], vec![]);
        assert_eq!(result.improvements, vec![NO_IMPROVEMENTS.to_string()]);
        assert!(!result.needs_improvement());
        assert_eq!(result.overall_score, 1.0);
    }

    #[test]
    fn test_strategy_serde_tag() {
        let strategy = ValidationStrategy::structured(
            ResponseSchema::new("plan").with_required(["steps"]),
        );
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["mode"], "structured");
        assert_eq!(json["schema"]["required"][0], "steps");

        let back: ValidationStrategy = serde_json::from_value(json).unwrap();
        assert_eq!(back, strategy);
    }

    #[test]
    fn test_severity_deductions() {
        let d = SeverityDeductions::default();
        assert!(Severity::Critical.deduction(&d) > Severity::High.deduction(&d));
        assert!(Severity::Medium.deduction(&d) > Severity::Low.deduction(&d));
    }
}
