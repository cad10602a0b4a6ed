//! Breakpoint types, rule definitions and the default catalogue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::BreakpointConfig;
use crate::error::{OrchestratorError, Result};

use super::condition::{CompareOp, Condition};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BreakpointType {
    ArchitectureDecision,
    BreakingTestFailure,
    ConflictingSolutions,
    MilestoneCompletion,
    RateLimitHit,
    TimeThresholdExceeded,
    ConfidenceTooLow,
    ConsecutiveFailures,
    CriticalTask,
    /// Registered at runtime.
    Custom(String),
}

impl BreakpointType {
    pub const BUILT_IN: [BreakpointType; 9] = [
        Self::ArchitectureDecision,
        Self::BreakingTestFailure,
        Self::ConflictingSolutions,
        Self::MilestoneCompletion,
        Self::RateLimitHit,
        Self::TimeThresholdExceeded,
        Self::ConfidenceTooLow,
        Self::ConsecutiveFailures,
        Self::CriticalTask,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::ArchitectureDecision => "architecture_decision",
            Self::BreakingTestFailure => "breaking_test_failure",
            Self::ConflictingSolutions => "conflicting_solutions",
            Self::MilestoneCompletion => "milestone_completion",
            Self::RateLimitHit => "rate_limit_hit",
            Self::TimeThresholdExceeded => "time_threshold_exceeded",
            Self::ConfidenceTooLow => "confidence_too_low",
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::CriticalTask => "critical_task",
            Self::Custom(name) => name,
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }
}

impl From<String> for BreakpointType {
    fn from(name: String) -> Self {
        Self::BUILT_IN
            .into_iter()
            .find(|t| t.as_str() == name)
            .unwrap_or(Self::Custom(name))
    }
}

impl From<BreakpointType> for String {
    fn from(t: BreakpointType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation order: `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPolicy {
    #[default]
    Immediate,
    /// Low-priority events are queued for `flush_batched`.
    Batched,
}

/// Longest wait an auto-resolving rule may schedule (one week).
pub const MAX_AUTO_RESOLVE_WAIT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AutoResolution {
    /// Resolution lands `wait_secs` in the future; callers retry after it.
    WaitAndRetry { wait_secs: u64 },
    CancelAndRetry,
}

impl AutoResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitAndRetry { .. } => "wait_and_retry",
            Self::CancelAndRetry => "cancel_and_retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointRule {
    pub breakpoint_type: BreakpointType,
    pub description: String,
    pub enabled: bool,
    pub priority: Priority,
    /// All must hold.
    pub conditions: Vec<Condition>,
    /// Merged over the caller's context during evaluation.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub notification: NotificationPolicy,
    #[serde(default)]
    pub auto_resolution: Option<AutoResolution>,
}

impl BreakpointRule {
    pub fn new(
        breakpoint_type: BreakpointType,
        priority: Priority,
        description: impl Into<String>,
    ) -> Self {
        Self {
            breakpoint_type,
            description: description.into(),
            enabled: true,
            priority,
            conditions: Vec::new(),
            thresholds: BTreeMap::new(),
            notification: NotificationPolicy::Immediate,
            auto_resolution: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_threshold(mut self, name: impl Into<String>, value: f64) -> Self {
        self.thresholds.insert(name.into(), value);
        self
    }

    pub fn batched(mut self) -> Self {
        self.notification = NotificationPolicy::Batched;
        self
    }

    pub fn auto_resolving(mut self, action: AutoResolution) -> Self {
        self.auto_resolution = Some(action);
        self
    }

    pub fn auto_resolve(&self) -> bool {
        self.auto_resolution.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.breakpoint_type.as_str().trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "breakpoint type name must not be empty".into(),
            ));
        }
        if self.conditions.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "rule {} has no conditions",
                self.breakpoint_type
            )));
        }
        for condition in &self.conditions {
            condition.validate().map_err(|e| {
                OrchestratorError::Validation(format!("rule {}: {e}", self.breakpoint_type))
            })?;
        }
        if let Some((name, value)) = self.thresholds.iter().find(|(_, v)| !v.is_finite()) {
            return Err(OrchestratorError::Validation(format!(
                "rule {} threshold {name} is not finite: {value}",
                self.breakpoint_type
            )));
        }
        if let Some(AutoResolution::WaitAndRetry { wait_secs }) = &self.auto_resolution
            && *wait_secs > MAX_AUTO_RESOLVE_WAIT_SECS
        {
            return Err(OrchestratorError::Validation(format!(
                "rule {} wait_secs {wait_secs} exceeds {MAX_AUTO_RESOLVE_WAIT_SECS}",
                self.breakpoint_type
            )));
        }
        Ok(())
    }
}

/// Built-in catalogue, in registration order.
pub fn default_rules(config: &BreakpointConfig) -> Vec<BreakpointRule> {
    use BreakpointType::*;

    vec![
        BreakpointRule::new(
            ArchitectureDecision,
            Priority::High,
            "An architectural change needs human sign-off",
        )
        .with_condition(Condition::flag("architecture_change")),
        BreakpointRule::new(
            BreakingTestFailure,
            Priority::High,
            "Previously passing tests are now failing",
        )
        .with_condition(Condition::compare_vars(
            "breaking_test_count",
            CompareOp::Ge,
            "min_breaking_tests",
        ))
        .with_threshold("min_breaking_tests", config.min_breaking_tests as f64),
        BreakpointRule::new(
            ConflictingSolutions,
            Priority::Medium,
            "Candidate solutions disagree",
        )
        .with_condition(Condition::compare_vars(
            "solution_count",
            CompareOp::Ge,
            "min_conflicting_solutions",
        ))
        .with_condition(Condition::compare_vars(
            "solution_agreement",
            CompareOp::Lt,
            "min_solution_agreement",
        ))
        .with_threshold(
            "min_conflicting_solutions",
            config.min_conflicting_solutions as f64,
        )
        .with_threshold("min_solution_agreement", config.min_solution_agreement),
        BreakpointRule::new(MilestoneCompletion, Priority::Low, "A milestone was reached")
            .with_condition(Condition::flag("milestone_reached"))
            .batched(),
        BreakpointRule::new(RateLimitHit, Priority::Medium, "Upstream rate limit hit")
            .with_condition(Condition::flag("rate_limited"))
            .auto_resolving(AutoResolution::WaitAndRetry {
                wait_secs: config.rate_limit_wait_secs,
            }),
        BreakpointRule::new(
            TimeThresholdExceeded,
            Priority::Medium,
            "Task ran past its time budget",
        )
        .with_condition(Condition::compare_vars(
            "elapsed_minutes",
            CompareOp::Gt,
            "time_threshold_minutes",
        ))
        .with_threshold("time_threshold_minutes", config.time_threshold_minutes)
        .auto_resolving(AutoResolution::CancelAndRetry),
        BreakpointRule::new(
            ConfidenceTooLow,
            Priority::High,
            "Confidence below the minimum",
        )
        .with_condition(Condition::compare_vars(
            "confidence_score",
            CompareOp::Lt,
            "min_confidence",
        ))
        .with_threshold("min_confidence", config.min_confidence),
        BreakpointRule::new(
            ConsecutiveFailures,
            Priority::High,
            "Too many consecutive failures",
        )
        .with_condition(Condition::compare_vars(
            "consecutive_failures",
            CompareOp::Ge,
            "max_consecutive_failures",
        ))
        .with_threshold(
            "max_consecutive_failures",
            config.max_consecutive_failures as f64,
        ),
        BreakpointRule::new(
            CriticalTask,
            Priority::High,
            "Critical task without near-certain confidence",
        )
        .with_condition(Condition::flag("critical_task"))
        .with_condition(Condition::compare_vars(
            "confidence_score",
            CompareOp::Lt,
            "critical_confidence",
        ))
        .with_threshold("critical_confidence", config.critical_confidence),
    ]
}
