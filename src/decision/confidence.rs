//! Confidence blend for decisions.
//!
//! Missing signals are neutral (0.5), except validation: no report counts as
//! not passed. The blend is normalised by the weights of the signals used,
//! so the complexity weight only applies when a complexity score is present.

use serde::{Deserialize, Serialize};

use crate::config::SignalWeights;
use crate::utils::count_word_hits;

use super::context::DecisionContext;

const NEUTRAL: f64 = 0.5;

const COMPLETION_TERMS: &[&str] = &[
    "done", "completed", "implemented", "finished", "fixed", "added", "passing", "success",
];

const ERROR_TERMS: &[&str] = &[
    "error", "failed", "failure", "exception", "cannot", "unable", "panic", "todo", "fixme",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub validation: f64,
    pub quality: f64,
    pub confidence: f64,
    pub history: f64,
    pub complexity: Option<f64>,
    pub overall: f64,
}

/// Cheap quality estimate of a raw response from its shape and vocabulary.
pub fn assess_response(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let mut score = 0.15;
    score += match trimmed.chars().count() {
        0..50 => 0.1,
        50..200 => 0.2,
        _ => 0.3,
    };
    if trimmed.contains("```") {
        score += 0.2;
    }
    let structured = trimmed.lines().map(str::trim_start).any(|l| {
        l.starts_with('#')
            || l.starts_with("- ")
            || l.starts_with("* ")
            || l.split_once(". ")
                .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    });
    if structured {
        score += 0.15;
    }

    let lower = trimmed.to_lowercase();
    if count_word_hits(&lower, COMPLETION_TERMS) > 0 {
        score += 0.2;
    }
    let errors = count_word_hits(&lower, ERROR_TERMS);
    score -= (0.1 * errors as f64).min(0.3);

    score.clamp(0.0, 1.0)
}

pub fn compute_confidence(
    context: &DecisionContext,
    proceed_success_rate: f64,
    weights: &SignalWeights,
) -> ConfidenceBreakdown {
    let validation = if context.validation.as_ref().is_some_and(|v| v.passes()) {
        1.0
    } else {
        0.0
    };

    let quality = context
        .quality_score
        .or(context.quality_gate_passed.map(|p| if p { 1.0 } else { 0.0 }))
        .or(context.response.as_deref().map(assess_response))
        .unwrap_or(NEUTRAL);

    let confidence = context
        .confidence_score
        .or(context
            .validation
            .as_ref()
            .map(|v| if v.complete { 1.0 } else { 0.3 }))
        .or(context.response.as_deref().map(assess_response))
        .unwrap_or(NEUTRAL);

    let complexity = context
        .complexity_score
        .map(|c| 1.0 - c.clamp(0.0, 100.0) / 100.0);

    let signal = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let mut weighted = weights.validation * validation
        + weights.quality * signal(quality)
        + weights.confidence * signal(confidence)
        + weights.history * signal(proceed_success_rate);
    let mut total = weights.validation + weights.quality + weights.confidence + weights.history;
    if let Some(c) = complexity {
        weighted += weights.complexity * c;
        total += weights.complexity;
    }

    let overall = if total > 0.0 { weighted / total } else { 0.0 };

    ConfidenceBreakdown {
        validation,
        quality: signal(quality),
        confidence: signal(confidence),
        history: signal(proceed_success_rate),
        complexity,
        overall: overall.clamp(0.0, 1.0),
    }
}
