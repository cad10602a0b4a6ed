//! Schema and rule-compliance validation for structured replies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::breakpoint::ContextMap;
use crate::config::QualityConfig;
use crate::utils::extract_json_object;

use super::rules::{RuleSource, check_rules};
use super::types::{ResponseSchema, RuleViolation};

#[derive(Debug, Clone)]
pub(crate) struct StructuredOutcome {
    pub overall: f64,
    pub stage_scores: BTreeMap<String, f64>,
    pub improvements: Vec<String>,
    pub violations: Vec<RuleViolation>,
    pub schema_error: Option<String>,
    pub missing_fields: Vec<String>,
}

fn parse_reply(output: &str) -> Result<ContextMap, String> {
    let json = extract_json_object(output).ok_or("reply contains no JSON object")?;
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("reply is not a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Fraction of required fields present and non-null; 1.0 when nothing is required.
pub fn completeness(parsed: &ContextMap, schema: &ResponseSchema) -> f64 {
    if schema.required.is_empty() {
        return 1.0;
    }
    let present = schema
        .required
        .iter()
        .filter(|f| parsed.get(f.as_str()).is_some_and(|v| !v.is_null()))
        .count();
    present as f64 / schema.required.len() as f64
}

pub(crate) fn validate_structured(
    output: &str,
    schema: &ResponseSchema,
    rules: Option<&dyn RuleSource>,
    rule_domains: &[String],
    config: &QualityConfig,
) -> StructuredOutcome {
    let parsed = match parse_reply(output) {
        Ok(parsed) => parsed,
        Err(reason) => {
            return StructuredOutcome {
                overall: config.schema_failure_score,
                stage_scores: BTreeMap::from([
                    ("compliance".to_string(), 0.0),
                    ("completeness".to_string(), 0.0),
                ]),
                improvements: vec![format!(
                    "Reply must be a JSON object matching the `{}` schema ({reason})",
                    schema.name
                )],
                violations: Vec::new(),
                schema_error: Some(reason),
                missing_fields: schema.required.clone(),
            };
        }
    };

    let completeness = completeness(&parsed, schema);
    let missing_fields: Vec<String> = schema
        .required
        .iter()
        .filter(|f| parsed.get(f.as_str()).is_none_or(Value::is_null))
        .cloned()
        .collect();

    let violations = rules
        .map(|source| check_rules(source, rule_domains, output, Some(&parsed)))
        .unwrap_or_default();
    let deducted: f64 = violations
        .iter()
        .map(|v| v.severity.deduction(&config.deductions))
        .sum();
    let compliance = (1.0 - deducted).max(0.0);

    let weight_sum = config.compliance_weight + config.completeness_weight;
    let overall = if weight_sum > 0.0 {
        (config.compliance_weight * compliance + config.completeness_weight * completeness)
            / weight_sum
    } else {
        (compliance + completeness) / 2.0
    };

    let mut improvements: Vec<String> = missing_fields
        .iter()
        .map(|f| format!("Add required field `{f}`"))
        .collect();
    improvements.extend(
        violations
            .iter()
            .map(|v| format!("[{}] {}: {}", v.severity, v.rule_name, v.message)),
    );

    StructuredOutcome {
        overall: overall.clamp(0.0, 1.0),
        stage_scores: BTreeMap::from([
            ("compliance".to_string(), compliance),
            ("completeness".to_string(), completeness),
        ]),
        improvements,
        violations,
        schema_error: None,
        missing_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{RuleDefinition, Severity, StaticRuleSource, ValidationType};

    fn schema() -> ResponseSchema {
        ResponseSchema::new("review").with_required(["verdict", "findings"])
    }

    #[test]
    fn test_unparsable_reply_scores_low() {
        let config = QualityConfig::default();
        let outcome = validate_structured("looks fine to me", &schema(), None, &[], &config);
        assert_eq!(outcome.overall, config.schema_failure_score);
        assert!(outcome.schema_error.is_some());
        assert_eq!(outcome.improvements.len(), 1);
    }

    #[test]
    fn test_completeness_counts_required_fields() {
        let config = QualityConfig::default();
        let outcome = validate_structured(
            "```json\n{\"verdict\": \"approve\", \"findings\": null}\n```",
            &schema(),
            None,
            &[],
            &config,
        );
        assert_eq!(outcome.stage_scores["completeness"], 0.5);
        assert_eq!(outcome.stage_scores["compliance"], 1.0);
        assert_eq!(outcome.missing_fields, vec!["findings".to_string()]);
        assert!((outcome.overall - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_violations_deduct_by_severity() {
        let config = QualityConfig::default();
        let rules = StaticRuleSource::new()
            .with_rule(
                RuleDefinition::new(
                    "sec-1",
                    "No eval",
                    "security",
                    Severity::Critical,
                    ValidationType::ForbiddenPattern {
                        pattern: r"\beval\(".into(),
                    },
                )
                .unwrap(),
            )
            .unwrap()
            .with_rule(
                RuleDefinition::new(
                    "style-1",
                    "Terse verdict",
                    "style",
                    Severity::Low,
                    ValidationType::MaxLength {
                        field: Some("verdict".into()),
                        max: 3,
                    },
                )
                .unwrap(),
            )
            .unwrap();

        let reply = r#"{"verdict": "approve", "findings": ["uses eval(input)"]}"#;
        let outcome = validate_structured(reply, &schema(), Some(&rules), &[], &config);

        assert_eq!(outcome.violations.len(), 2);
        assert!((outcome.stage_scores["compliance"] - 0.65).abs() < 1e-9);
        assert!(outcome.improvements.iter().any(|i| i.starts_with("[critical] No eval")));

        let security_only =
            validate_structured(reply, &schema(), Some(&rules), &["security".into()], &config);
        assert_eq!(security_only.violations.len(), 1);
    }
}
