//! Quality gate for agent output.
//!
//! Two validation paths, chosen per controller or per call:
//! - Unstructured: four weighted stages (syntax, requirements, quality, testing)
//! - Structured: schema parsing, rule compliance and completeness
//!
//! Every result is appended to a per-project history used for trends and reports.

mod controller;
mod history;
mod rules;
mod stages;
mod structured;
mod types;

pub use controller::{QualityContext, QualityController};
pub use history::{IssueCount, QualityReport, QualityTrend, TrendDirection, compute_trend};
pub use rules::{RuleDefinition, RuleSource, StaticRuleSource, ValidationType, check_rules};
pub use stages::{
    calculate_quality_score, quality_stage, requirements_stage, run_stages, syntax_stage,
    testing_stage,
};
pub use structured::completeness;
pub use types::{
    NO_IMPROVEMENTS, QualityResult, ResponseSchema, RuleViolation, Severity, Stage, StageReport,
    ValidationStrategy,
};
