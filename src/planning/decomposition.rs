//! Subtask suggestion templates and phase-based dependency assignment.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::{contains_word, truncate_at_boundary};

use super::subtask::SubTask;

const SUBJECT_MAX_LEN: usize = 80;
const MIN_SUBTASK_MINUTES: u32 = 5;
const LARGE_TASK_SCORE: f64 = 80.0;
const LARGE_TASK_LOC: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPattern {
    BugFix,
    Refactor,
    Database,
    Integration,
    Feature,
    Generic,
}

impl TaskPattern {
    /// An explicit task type wins; otherwise the first matching keyword class.
    pub fn detect(description: &str, task_type: Option<&str>) -> Self {
        if let Some(pattern) = task_type.and_then(Self::from_task_type) {
            return pattern;
        }

        let lower = description.to_lowercase();
        if contains_word(&lower, &["fix", "bug", "crash", "broken", "regression", "error"]) {
            Self::BugFix
        } else if contains_word(&lower, &["refactor", "restructure", "cleanup", "reorganiz"]) {
            Self::Refactor
        } else if contains_word(&lower, &["database", "schema", "migration", "table", "sql"]) {
            Self::Database
        } else if contains_word(&lower, &["integrat", "api", "webhook", "third-party"]) {
            Self::Integration
        } else if contains_word(
            &lower,
            &["implement", "add", "build", "create", "feature", "develop", "support"],
        ) {
            Self::Feature
        } else {
            Self::Generic
        }
    }

    fn from_task_type(task_type: &str) -> Option<Self> {
        match task_type.trim().to_lowercase().as_str() {
            "bugfix" | "bug" | "fix" | "hotfix" => Some(Self::BugFix),
            "refactor" | "refactoring" => Some(Self::Refactor),
            "database" | "db" | "migration" => Some(Self::Database),
            "integration" | "api" => Some(Self::Integration),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }

    fn templates(&self, large: bool) -> &'static [&'static str] {
        match self {
            Self::BugFix => &[
                "Reproduce and investigate the root cause of {}",
                "Implement the fix for {}",
                "Test {} with regression cases",
                "Verify related behavior still works after {}",
            ],
            Self::Refactor => &[
                "Analyze the current structure and plan the refactoring of {}",
                "Refactor the core code for {}",
                "Update call sites affected by {}",
                "Test and validate behavior after {}",
            ],
            Self::Database => &[
                "Design the data model and schema changes for {}",
                "Implement migration scripts for {}",
                "Implement the data access layer for {}",
                "Test migrations and queries for {}",
            ],
            Self::Integration => &[
                "Analyze the external interface and contract for {}",
                "Implement the client and adapter for {}",
                "Implement error handling and retries for {}",
                "Test {} against the external contract",
                "Document configuration for {}",
            ],
            Self::Feature => &[
                "Design the architecture and interfaces for {}",
                "Implement core functionality for {}",
                "Test {} with unit and integration tests",
                "Document {}",
            ],
            Self::Generic if large => &[
                "Plan the approach for {}",
                "Implement the first part of {}",
                "Implement the remaining parts of {}",
                "Test {}",
                "Document {}",
            ],
            Self::Generic => &["Plan the approach for {}", "Implement {}", "Test {}"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    Implementation,
    Testing,
    Documentation,
    Deployment,
    Other,
}

impl Phase {
    pub fn classify(description: &str) -> Self {
        let lower = description.trim().to_lowercase();
        let first = lower
            .split(|c: char| !c.is_alphanumeric())
            .find(|w| !w.is_empty())
            .unwrap_or_default();

        match first {
            "design" | "analyze" | "analyse" | "plan" | "reproduce" | "investigate" | "research" => {
                Self::Design
            }
            "test" | "verify" | "validate" => Self::Testing,
            "document" => Self::Documentation,
            "deploy" | "release" | "ship" => Self::Deployment,
            "implement" | "refactor" | "write" | "build" | "create" | "add" | "migrate"
            | "update" | "develop" => Self::Implementation,
            _ if contains_word(&lower, &["test"]) => Self::Testing,
            _ if contains_word(&lower, &["document", "docs"]) => Self::Documentation,
            _ => Self::Other,
        }
    }

    /// Relative share of the parent's duration.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Implementation => 2.0,
            Self::Design | Self::Testing | Self::Other => 1.0,
            Self::Documentation | Self::Deployment => 0.5,
        }
    }
}

/// Strip a leading effort verb so templates read naturally.
fn subject_of(description: &str) -> String {
    const LEADING_VERBS: &[&str] = &[
        "implement", "build", "create", "develop", "design", "add", "fix", "refactor",
        "integrate", "migrate", "update", "write",
    ];
    let trimmed = description.trim().trim_end_matches(['.', '!']);
    let subject = trimmed
        .split_once(char::is_whitespace)
        .filter(|(first, _)| LEADING_VERBS.contains(&first.to_lowercase().as_str()))
        .map(|(_, rest)| rest.trim_start())
        .unwrap_or(trimmed);
    truncate_at_boundary(subject, SUBJECT_MAX_LEN)
}

/// Ordered subtask descriptions for a task judged worth decomposing.
pub fn suggest_subtasks(
    description: &str,
    task_type: Option<&str>,
    complexity_score: f64,
    estimated_loc: u64,
) -> Vec<String> {
    let pattern = TaskPattern::detect(description, task_type);
    let large = complexity_score >= LARGE_TASK_SCORE || estimated_loc > LARGE_TASK_LOC;
    let subject = subject_of(description);
    pattern
        .templates(large)
        .iter()
        .map(|t| t.replace("{}", &subject))
        .collect()
}

/// Build subtasks with phase-derived dependencies and duration shares.
///
/// Implementation depends on every design step; testing and documentation
/// on every implementation step (or design, if none); deployment on all
/// earlier steps; anything else on its immediate predecessor.
pub fn materialize_subtasks(
    task_id: &str,
    descriptions: &[String],
    complexity_score: f64,
    total_minutes: u32,
) -> Result<Vec<SubTask>> {
    let phases: Vec<Phase> = descriptions.iter().map(|d| Phase::classify(d)).collect();
    let weight_sum: f64 = phases.iter().map(Phase::weight).sum();
    let max_weight = phases.iter().map(Phase::weight).fold(0.0, f64::max);
    let ids: Vec<String> = (1..=descriptions.len())
        .map(|n| format!("{task_id}.{n}"))
        .collect();

    let ids_in = |phase: Phase, before: usize| -> Vec<String> {
        phases[..before]
            .iter()
            .zip(&ids)
            .filter(|(p, _)| **p == phase)
            .map(|(_, id)| id.clone())
            .collect()
    };

    let mut subtasks = Vec::with_capacity(descriptions.len());
    for (i, (description, phase)) in descriptions.iter().zip(&phases).enumerate() {
        let deps: Vec<String> = match phase {
            Phase::Design => Vec::new(),
            Phase::Implementation => ids_in(Phase::Design, i),
            Phase::Testing | Phase::Documentation => {
                let implementations = ids_in(Phase::Implementation, i);
                if implementations.is_empty() {
                    ids_in(Phase::Design, i)
                } else {
                    implementations
                }
            }
            Phase::Deployment => ids[..i].to_vec(),
            Phase::Other => i.checked_sub(1).map(|p| vec![ids[p].clone()]).unwrap_or_default(),
        };

        let share = if weight_sum > 0.0 {
            phase.weight() / weight_sum
        } else {
            0.0
        };
        let minutes = ((total_minutes as f64 * share).round() as u32).max(MIN_SUBTASK_MINUTES);
        let complexity = if max_weight > 0.0 {
            (complexity_score * phase.weight() / max_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        subtasks.push(
            SubTask::new(ids[i].clone(), task_id, description.clone())?
                .with_complexity(complexity)?
                .with_duration(minutes)
                .with_dependencies(deps)?,
        );
    }
    Ok(subtasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_detection_priority() {
        assert_eq!(TaskPattern::detect("fix login crash", None), TaskPattern::BugFix);
        assert_eq!(
            TaskPattern::detect("refactor the session module", None),
            TaskPattern::Refactor
        );
        assert_eq!(
            TaskPattern::detect("add a users table to the database", None),
            TaskPattern::Database
        );
        assert_eq!(
            TaskPattern::detect("implement user authentication with JWT", None),
            TaskPattern::Feature
        );
        assert_eq!(TaskPattern::detect("misc chores", None), TaskPattern::Generic);
        assert_eq!(
            TaskPattern::detect("misc chores", Some("bugfix")),
            TaskPattern::BugFix
        );
    }

    #[test]
    fn test_phase_classification() {
        assert_eq!(Phase::classify("Design the schema"), Phase::Design);
        assert_eq!(Phase::classify("Implement core"), Phase::Implementation);
        assert_eq!(Phase::classify("Test it"), Phase::Testing);
        assert_eq!(Phase::classify("Document it"), Phase::Documentation);
        assert_eq!(Phase::classify("Deploy to staging"), Phase::Deployment);
        assert_eq!(Phase::classify("Run a load test"), Phase::Testing);
        assert_eq!(Phase::classify("Coordinate with ops"), Phase::Other);
    }

    #[test]
    fn test_feature_suggestions_strip_leading_verb() {
        let s = suggest_subtasks("Implement user authentication with JWT", None, 80.0, 600);
        assert_eq!(s.len(), 4);
        assert_eq!(
            s[0],
            "Design the architecture and interfaces for user authentication with JWT"
        );
    }

    #[test]
    fn test_generic_size_variants() {
        assert_eq!(suggest_subtasks("chores", None, 40.0, 100).len(), 3);
        assert_eq!(suggest_subtasks("chores", None, 85.0, 100).len(), 5);
    }

    #[test]
    fn test_phase_dependencies() {
        let descriptions: Vec<String> = [
            "Design the API",
            "Implement handlers",
            "Implement storage",
            "Test the API",
            "Document the API",
            "Deploy the API",
            "Coordinate with ops",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let subtasks = materialize_subtasks("t", &descriptions, 80.0, 120).unwrap();
        let deps = |i: usize| -> Vec<&str> {
            subtasks[i].dependencies.iter().map(String::as_str).collect()
        };

        assert!(deps(0).is_empty());
        assert_eq!(deps(1), vec!["t.1"]);
        assert_eq!(deps(2), vec!["t.1"]);
        assert_eq!(deps(3), vec!["t.2", "t.3"]);
        assert_eq!(deps(4), vec!["t.2", "t.3"]);
        assert_eq!(deps(5), vec!["t.1", "t.2", "t.3", "t.4", "t.5"]);
        assert_eq!(deps(6), vec!["t.6"]);
        assert_eq!(subtasks[1].estimated_complexity, 80.0);
        assert!(subtasks.iter().all(|s| s.estimated_duration_minutes >= 5));
    }

    #[test]
    fn test_testing_without_implementation_depends_on_design() {
        let descriptions = vec!["Investigate flakiness".to_string(), "Test retries".to_string()];
        let subtasks = materialize_subtasks("t", &descriptions, 50.0, 30).unwrap();
        assert!(subtasks[1].dependencies.contains("t.1"));
    }
}
