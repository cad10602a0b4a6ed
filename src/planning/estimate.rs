use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::ParallelGroup;
use super::subtask::SubTask;

/// Optional explicit context supplied with a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimationContext {
    pub files: Vec<String>,
    /// Ids of tasks this one depends on.
    pub dependencies: Vec<String>,
    pub task_type: Option<String>,
}

impl EstimationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Whether the caller gave anything beyond the description.
    pub fn has_explicit_scope(&self) -> bool {
        !self.files.is_empty() || !self.dependencies.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    Heuristic,
    Blended,
}

/// Complexity analysis of one parent task.
///
/// A recommendation only: the caller decides whether to decompose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    pub task_id: String,
    pub estimated_tokens: u64,
    pub estimated_loc: u64,
    pub estimated_files: u32,
    /// 0-100.
    pub complexity_score: f64,
    pub suggests_decomposition: bool,
    /// 0-1.
    pub suggestion_confidence: f64,
    pub suggested_subtasks: Vec<String>,
    pub suggested_parallel_groups: Vec<ParallelGroup>,
    /// Materialized subtasks with dependencies and group assignments.
    pub subtasks: Vec<SubTask>,
    pub speedup_factor: f64,
    pub parallel_efficiency: f64,
    pub plan_warnings: Vec<String>,
    pub estimated_duration_minutes: u32,
    pub rationale: String,
    pub source: EstimateSource,
    pub timestamp: DateTime<Utc>,
}

impl ComplexityEstimate {
    pub fn parallel_group_count(&self) -> usize {
        self.suggested_parallel_groups.len()
    }

    pub fn is_blended(&self) -> bool {
        self.source == EstimateSource::Blended
    }
}
