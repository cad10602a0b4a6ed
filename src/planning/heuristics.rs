//! Keyword-driven complexity heuristics.
//!
//! Always runs, needs no external services, and produces every metric the
//! advisory pass would. Scores are additive bonuses on top of an effort-class
//! base; line counts are multiplicative.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ComplexityConfig;
use crate::utils::count_word_hits;

use super::estimate::EstimationContext;

const HIGH_EFFORT_VERBS: &[&str] = &[
    "implement", "build", "create", "develop", "design", "architect", "migrate", "refactor",
    "integrate", "rewrite",
];
const MEDIUM_EFFORT_VERBS: &[&str] = &[
    "add", "update", "modify", "extend", "enhance", "improve", "optimize", "change",
];
const LOW_EFFORT_VERBS: &[&str] = &[
    "fix", "rename", "remove", "delete", "tweak", "typo", "adjust", "bump", "format",
];

const BASE_CONFIDENCE: f64 = 0.6;
const KEYWORD_ONLY_CONFIDENCE_CAP: f64 = 0.75;
const MAX_CONCEPT_MULTIPLIER: f64 = 3.0;

static FILE_COUNT_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn file_count_pattern() -> Option<&'static Regex> {
    FILE_COUNT_PATTERN
        .get_or_init(|| Regex::new(r"(\d+)\s+files?\b").ok())
        .as_ref()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortClass {
    High,
    Medium,
    Low,
    Unclassified,
}

impl EffortClass {
    pub fn detect(text_lower: &str) -> Self {
        if count_word_hits(text_lower, HIGH_EFFORT_VERBS) > 0 {
            Self::High
        } else if count_word_hits(text_lower, MEDIUM_EFFORT_VERBS) > 0 {
            Self::Medium
        } else if count_word_hits(text_lower, LOW_EFFORT_VERBS) > 0 {
            Self::Low
        } else {
            Self::Unclassified
        }
    }

    pub fn base_complexity(&self) -> f64 {
        match self {
            Self::High => 50.0,
            Self::Medium => 30.0,
            Self::Low => 15.0,
            Self::Unclassified => 25.0,
        }
    }

    pub fn base_loc(&self) -> f64 {
        match self {
            Self::High => 200.0,
            Self::Medium => 80.0,
            Self::Low => 20.0,
            Self::Unclassified => 50.0,
        }
    }

    fn default_files(&self) -> u32 {
        match self {
            Self::High => 3,
            Self::Medium | Self::Unclassified => 2,
            Self::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high-effort",
            Self::Medium => "medium-effort",
            Self::Low => "low-effort",
            Self::Unclassified => "unclassified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concept {
    Security,
    Concurrency,
    Algorithmic,
    Database,
    Integration,
}

impl Concept {
    pub const ALL: [Concept; 5] = [
        Self::Security,
        Self::Concurrency,
        Self::Algorithmic,
        Self::Database,
        Self::Integration,
    ];

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Security => &[
                "auth", "jwt", "oauth", "encrypt", "token", "password", "permission",
                "credential", "security", "crypto",
            ],
            Self::Concurrency => &[
                "concurren", "parallel", "async", "thread", "lock", "mutex", "race",
            ],
            Self::Algorithmic => &["algorithm", "optimiz", "graph", "sort", "recurs", "cache"],
            Self::Database => &["database", "schema", "migration", "sql", "query", "orm"],
            Self::Integration => &[
                "api", "integrat", "webhook", "endpoint", "third-party", "external",
            ],
        }
    }

    pub fn loc_multiplier(&self) -> f64 {
        match self {
            Self::Security => 1.5,
            Self::Concurrency => 1.4,
            Self::Algorithmic | Self::Database => 1.3,
            Self::Integration => 1.2,
        }
    }

    pub fn complexity_bonus(&self) -> f64 {
        match self {
            Self::Security => 20.0,
            Self::Concurrency => 15.0,
            Self::Algorithmic => 12.0,
            Self::Database => 10.0,
            Self::Integration => 8.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security-sensitive",
            Self::Concurrency => "concurrent",
            Self::Algorithmic => "algorithmic",
            Self::Database => "database",
            Self::Integration => "integration",
        }
    }

    pub fn detect_all(text_lower: &str) -> Vec<Concept> {
        Self::ALL
            .into_iter()
            .filter(|c| count_word_hits(text_lower, c.keywords()) > 0)
            .collect()
    }
}

/// File-count band: (line multiplier, complexity bonus).
fn file_band(files: u32) -> (f64, f64) {
    match files {
        0..=1 => (1.0, 0.0),
        2..=3 => (1.5, 5.0),
        4..=5 => (2.0, 10.0),
        6..=10 => (3.0, 15.0),
        _ => (4.0, 20.0),
    }
}

fn count_enumerated_items(description: &str) -> usize {
    description
        .lines()
        .map(str::trim_start)
        .filter(|line| {
            line.starts_with("- ")
                || line.starts_with("* ")
                || line
                    .split_once(['.', ')'])
                    .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .count()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicAnalysis {
    pub complexity_score: f64,
    pub estimated_loc: u64,
    pub estimated_files: u32,
    pub estimated_tokens: u64,
    pub estimated_duration_minutes: u32,
    pub confidence: f64,
    pub effort: EffortClass,
    pub concepts: Vec<Concept>,
    /// Human-readable contributors to the score.
    pub factors: Vec<String>,
}

pub fn analyze(
    description: &str,
    context: &EstimationContext,
    config: &ComplexityConfig,
) -> HeuristicAnalysis {
    let lower = description.to_lowercase();
    let mut factors = Vec::new();

    let effort = EffortClass::detect(&lower);
    let mut score = effort.base_complexity();
    let mut loc = effort.base_loc();
    factors.push(format!("{} task (base {:.0})", effort.as_str(), score));

    let files = if !context.files.is_empty() {
        context.files.len() as u32
    } else {
        file_count_pattern()
            .and_then(|re| re.captures(&lower))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or_else(|| effort.default_files())
    };
    let (file_multiplier, file_bonus) = file_band(files);
    loc *= file_multiplier;
    if file_bonus > 0.0 {
        score += file_bonus;
        factors.push(format!("{files} files (+{file_bonus:.0})"));
    }

    let concepts = Concept::detect_all(&lower);
    let mut concept_multiplier = 1.0;
    for concept in &concepts {
        score += concept.complexity_bonus();
        concept_multiplier *= concept.loc_multiplier();
        factors.push(format!(
            "{} work (+{:.0})",
            concept.as_str(),
            concept.complexity_bonus()
        ));
    }
    loc *= concept_multiplier.min(MAX_CONCEPT_MULTIPLIER);

    let verb_count = [HIGH_EFFORT_VERBS, MEDIUM_EFFORT_VERBS, LOW_EFFORT_VERBS]
        .iter()
        .map(|verbs| count_word_hits(&lower, verbs))
        .sum::<usize>();
    if verb_count > 1 {
        let bonus = ((verb_count - 1) as f64 * 5.0).min(15.0);
        score += bonus;
        loc *= 1.0 + 0.2 * (verb_count - 1).min(3) as f64;
        factors.push(format!("{verb_count} distinct actions (+{bonus:.0})"));
    }

    let enumerated = count_enumerated_items(description);
    if enumerated >= 2 {
        let bonus = (enumerated as f64 * 3.0).min(15.0);
        score += bonus;
        loc += 20.0 * enumerated as f64;
        factors.push(format!("{enumerated} enumerated items (+{bonus:.0})"));
    }

    if !context.dependencies.is_empty() {
        let bonus = (context.dependencies.len() as f64 * 5.0).min(15.0);
        score += bonus;
        factors.push(format!(
            "{} upstream dependencies (+{bonus:.0})",
            context.dependencies.len()
        ));
    }

    let complexity_score = score.clamp(0.0, 100.0);
    let estimated_loc = loc.round().max(1.0) as u64;
    let estimated_tokens = (description.len() / 4) as u64 + 2 * estimated_loc;
    let estimated_duration_minutes = ((estimated_loc as f64 / config.loc_per_minute).round()
        as u32)
        .max(config.min_duration_minutes);

    HeuristicAnalysis {
        complexity_score,
        estimated_loc,
        estimated_files: files,
        estimated_tokens,
        estimated_duration_minutes,
        confidence: confidence(description, context),
        effort,
        concepts,
        factors,
    }
}

fn confidence(description: &str, context: &EstimationContext) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if !context.files.is_empty() {
        confidence += 0.15;
    }
    if !context.dependencies.is_empty() {
        confidence += 0.1;
    }
    if context.task_type.is_some() {
        confidence += 0.05;
    }
    if description.split_whitespace().count() >= 20 {
        confidence += 0.05;
    }

    let cap = if context.has_explicit_scope() {
        1.0
    } else {
        KEYWORD_ONLY_CONFIDENCE_CAP
    };
    confidence.min(cap)
}
