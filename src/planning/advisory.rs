//! Optional secondary judgment for complexity estimation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::utils::{extract_json_object, truncate_at_boundary};

use super::estimate::EstimationContext;
use super::heuristics::HeuristicAnalysis;

/// Text-in, text-out advisory model.
///
/// Failures are never fatal: the estimator logs them and keeps the
/// heuristic result.
pub trait AdvisorySource: Send + Sync {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

impl<A: AdvisorySource + ?Sized> AdvisorySource for Arc<A> {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        (**self).generate(prompt)
    }
}

/// Structured reply requested from the advisory source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdvisoryAssessment {
    /// 0-100.
    pub complexity_score: f64,
    pub estimated_tokens: u64,
    pub estimated_loc: u64,
    pub estimated_files: u32,
    pub estimated_duration_minutes: u32,
    pub should_decompose: bool,
    /// Self-reported confidence, 0-1.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_subtasks: Vec<String>,
}

impl AdvisoryAssessment {
    fn check(self) -> Result<Self> {
        if !self.complexity_score.is_finite() || !(0.0..=100.0).contains(&self.complexity_score)
        {
            return Err(OrchestratorError::Advisory(format!(
                "complexity_score out of range: {}",
                self.complexity_score
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(OrchestratorError::Advisory(format!(
                "confidence out of range: {}",
                self.confidence
            )));
        }
        Ok(self)
    }
}

/// Outcome of consulting the advisory source for one estimate.
#[derive(Debug)]
pub enum AdvisoryOutcome {
    /// No source configured.
    Unavailable,
    Failed(OrchestratorError),
    Assessed(AdvisoryAssessment),
}

impl AdvisoryOutcome {
    pub fn assessment(&self) -> Option<&AdvisoryAssessment> {
        match self {
            Self::Assessed(a) => Some(a),
            _ => None,
        }
    }
}

pub fn build_prompt(
    description: &str,
    context: &EstimationContext,
    heuristic: &HeuristicAnalysis,
) -> String {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(AdvisoryAssessment))
        .unwrap_or_default();

    let mut prompt = String::from(
        "Assess the complexity of the following software task and decide whether it \
         should be decomposed into smaller subtasks.\n\n",
    );
    prompt.push_str(&format!("## Task\n{}\n\n", description.trim()));

    if !context.files.is_empty() {
        prompt.push_str(&format!("## Files in scope ({})\n", context.files.len()));
        for file in context.files.iter().take(20) {
            prompt.push_str(&format!("- {file}\n"));
        }
        prompt.push('\n');
    }
    if !context.dependencies.is_empty() {
        prompt.push_str(&format!(
            "## Depends on tasks\n{}\n\n",
            context.dependencies.join(", ")
        ));
    }
    if let Some(task_type) = &context.task_type {
        prompt.push_str(&format!("## Task type\n{task_type}\n\n"));
    }

    prompt.push_str(&format!(
        "## Heuristic baseline\ncomplexity {:.0}/100, ~{} LOC across {} files, ~{} min ({})\n\n",
        heuristic.complexity_score,
        heuristic.estimated_loc,
        heuristic.estimated_files,
        heuristic.estimated_duration_minutes,
        truncate_at_boundary(&heuristic.factors.join("; "), 300),
    ));

    prompt.push_str("Reply with a single JSON object matching this schema:\n```json\n");
    prompt.push_str(&schema);
    prompt.push_str("\n```\n");
    prompt
}

/// Parse a free-form reply into an assessment.
pub fn parse_assessment(reply: &str) -> Result<AdvisoryAssessment> {
    let json = extract_json_object(reply)
        .ok_or_else(|| OrchestratorError::Advisory("reply contains no JSON object".into()))?;
    let assessment: AdvisoryAssessment = serde_json::from_str(json)
        .map_err(|e| OrchestratorError::Advisory(format!("unparsable assessment: {e}")))?;
    assessment.check()
}
