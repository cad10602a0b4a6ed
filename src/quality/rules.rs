//! Rule definitions and rule sources.
//!
//! A rule source maps a domain name to an ordered list of rules. The same
//! definitions drive structured quality validation and any rule-based
//! breakpoint extension.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::breakpoint::{Condition, ContextMap};
use crate::error::{OrchestratorError, Result};

use super::types::{RuleViolation, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationType {
    /// A top-level field of the parsed reply must be present and non-null.
    RequiredField { field: String },
    /// The raw output must not match.
    ForbiddenPattern { pattern: String },
    /// The raw output must match.
    RequiredPattern { pattern: String },
    /// Character limit for one string field, or the whole output when `field` is unset.
    MaxLength {
        #[serde(default)]
        field: Option<String>,
        max: usize,
    },
    /// Condition over the parsed reply's top-level fields; must hold.
    Condition { condition: Condition },
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiredField { .. } => "required_field",
            Self::ForbiddenPattern { .. } => "forbidden_pattern",
            Self::RequiredPattern { .. } => "required_pattern",
            Self::MaxLength { .. } => "max_length",
            Self::Condition { .. } => "condition",
        }
    }
}

/// Pattern compiled on first use, keyed by its source text.
#[derive(Debug, Clone, Default)]
struct CompiledPattern(OnceLock<(String, std::result::Result<Regex, regex::Error>)>);

impl PartialEq for CompiledPattern {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub validation_type: ValidationType,
    pub domain: String,
    #[serde(skip)]
    compiled: CompiledPattern,
}

impl RuleDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        domain: impl Into<String>,
        severity: Severity,
        validation_type: ValidationType,
    ) -> Result<Self> {
        let rule = Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            severity,
            validation_type,
            domain: domain.into(),
            compiled: CompiledPattern::default(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (value, field) in [(&self.id, "id"), (&self.name, "name"), (&self.domain, "domain")] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::Validation(format!(
                    "rule {:?}: {field} must not be empty",
                    self.id
                )));
            }
        }

        match &self.validation_type {
            ValidationType::RequiredField { field } if field.trim().is_empty() => Err(
                OrchestratorError::Validation(format!("rule {}: required field name is empty", self.id)),
            ),
            ValidationType::ForbiddenPattern { pattern }
            | ValidationType::RequiredPattern { pattern } => self
                .with_regex(pattern, |_| ())
                .map_err(|e| OrchestratorError::Validation(format!("rule {}: {e}", self.id))),
            ValidationType::MaxLength { max: 0, .. } => Err(OrchestratorError::Validation(format!(
                "rule {}: max length must be greater than 0",
                self.id
            ))),
            ValidationType::Condition { condition } => condition
                .validate()
                .map_err(|e| OrchestratorError::Validation(format!("rule {}: {e}", self.id))),
            _ => Ok(()),
        }
    }

    /// Clones share the compiled pattern; an edited pattern is compiled afresh.
    fn with_regex<T>(
        &self,
        pattern: &str,
        f: impl FnOnce(&Regex) -> T,
    ) -> std::result::Result<T, regex::Error> {
        let (source, compiled) = self
            .compiled
            .0
            .get_or_init(|| (pattern.to_string(), Regex::new(pattern)));
        if source == pattern {
            compiled.as_ref().map(f).map_err(Clone::clone)
        } else {
            Regex::new(pattern).map(|re| f(&re))
        }
    }

    /// Check one reply; `parsed` is the reply's JSON object when it has one.
    pub fn check(&self, output: &str, parsed: Option<&ContextMap>) -> Option<RuleViolation> {
        let message = match &self.validation_type {
            ValidationType::RequiredField { field } => {
                let present = parsed
                    .and_then(|p| p.get(field))
                    .is_some_and(|v| !v.is_null());
                (!present).then(|| format!("required field `{field}` is missing"))
            }
            ValidationType::ForbiddenPattern { pattern } => match self.with_regex(pattern, |re| {
                re.find(output)
                    .map(|m| format!("forbidden pattern matched: {:?}", m.as_str()))
            }) {
                Ok(message) => message,
                Err(e) => {
                    warn!(rule = %self.id, error = %e, "Skipping rule with invalid pattern");
                    None
                }
            },
            ValidationType::RequiredPattern { pattern } => match self.with_regex(pattern, |re| {
                (!re.is_match(output)).then(|| format!("required pattern not found: {pattern}"))
            }) {
                Ok(message) => message,
                Err(e) => {
                    warn!(rule = %self.id, error = %e, "Skipping rule with invalid pattern");
                    None
                }
            },
            ValidationType::MaxLength { field, max } => {
                let length = match field {
                    Some(field) => parsed
                        .and_then(|p| p.get(field))
                        .and_then(Value::as_str)
                        .map(|s| s.chars().count()),
                    None => Some(output.chars().count()),
                };
                length
                    .filter(|len| len > max)
                    .map(|len| format!("length {len} exceeds maximum {max}"))
            }
            ValidationType::Condition { condition } => {
                let empty = ContextMap::new();
                match condition.evaluate(parsed.unwrap_or(&empty)) {
                    Ok(true) => None,
                    Ok(false) => Some(format!("condition not met: {condition}")),
                    Err(e) => Some(format!("condition could not be evaluated: {e}")),
                }
            }
        }?;

        Some(RuleViolation {
            rule_id: self.id.clone(),
            rule_name: self.name.clone(),
            severity: self.severity,
            message,
            domain: self.domain.clone(),
        })
    }
}

pub trait RuleSource: Send + Sync {
    fn domains(&self) -> Vec<String>;

    /// Rules for one domain, in evaluation order. Unknown domains yield none.
    fn rules(&self, domain: &str) -> Vec<RuleDefinition>;
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

/// In-memory rule source, optionally loaded from a TOML file of `[[rules]]` tables.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    by_domain: BTreeMap<String, Vec<RuleDefinition>>,
}

impl StaticRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one rule. Invalid rules and duplicate ids within a domain are rejected.
    pub fn add(&mut self, rule: RuleDefinition) -> Result<()> {
        rule.validate()?;
        let rules = self.by_domain.entry(rule.domain.clone()).or_default();
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate rule id {} in domain {}",
                rule.id, rule.domain
            )));
        }
        rules.push(rule);
        Ok(())
    }

    pub fn with_rule(mut self, rule: RuleDefinition) -> Result<Self> {
        self.add(rule)?;
        Ok(self)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(content)?;
        let mut source = Self::new();
        let mut errors = Vec::new();

        for rule in file.rules {
            if let Err(e) = source.add(rule) {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(source)
        } else {
            Err(OrchestratorError::Config(errors.join("; ")))
        }
    }

    /// Load a rule file. A missing file is a configuration error.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OrchestratorError::Config(format!(
                "rule file not found: {}",
                path.display()
            )));
        }
        let content = tokio::fs::read_to_string(path).await?;
        let source = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), rules = source.len(), "Loaded rule file");
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.by_domain.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleSource for StaticRuleSource {
    fn domains(&self) -> Vec<String> {
        self.by_domain.keys().cloned().collect()
    }

    fn rules(&self, domain: &str) -> Vec<RuleDefinition> {
        self.by_domain.get(domain).cloned().unwrap_or_default()
    }
}

/// Run every rule of the selected domains; all domains when `domains` is empty.
pub fn check_rules(
    source: &dyn RuleSource,
    domains: &[String],
    output: &str,
    parsed: Option<&ContextMap>,
) -> Vec<RuleViolation> {
    let selected = if domains.is_empty() {
        source.domains()
    } else {
        domains.to_vec()
    };
    selected
        .iter()
        .flat_map(|domain| source.rules(domain))
        .filter_map(|rule| rule.check(output, parsed))
        .collect()
}
