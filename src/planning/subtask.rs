//! Decomposed unit of work and its lifecycle.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::utils::truncate_at_boundary;

const TITLE_MAX_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SubTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses reachable in one step. Terminal statuses have none.
    pub fn allowed_next(&self) -> &'static [SubTaskStatus] {
        match self {
            Self::Pending => &[Self::InProgress],
            Self::InProgress => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: SubTaskStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl fmt::Display for SubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub parent_task_id: String,
    pub title: String,
    pub description: String,
    /// 0-100.
    pub estimated_complexity: f64,
    pub estimated_duration_minutes: u32,
    pub dependencies: BTreeSet<String>,
    pub parallelizable: bool,
    /// Assigned by the parallel planner.
    pub parallel_group: Option<u32>,
    status: SubTaskStatus,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn new(
        id: impl Into<String>,
        parent_task_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        let description = description.into();
        if id.trim().is_empty() {
            return Err(OrchestratorError::Validation("subtask id must not be empty".into()));
        }
        if description.trim().is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "subtask {id} must have a description"
            )));
        }

        Ok(Self {
            title: truncate_at_boundary(description.trim(), TITLE_MAX_LEN),
            id,
            parent_task_id: parent_task_id.into(),
            description,
            estimated_complexity: 0.0,
            estimated_duration_minutes: 0,
            dependencies: BTreeSet::new(),
            parallelizable: true,
            parallel_group: None,
            status: SubTaskStatus::Pending,
            assigned_agent_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    pub fn with_complexity(mut self, complexity: f64) -> Result<Self> {
        if !complexity.is_finite() || !(0.0..=100.0).contains(&complexity) {
            return Err(OrchestratorError::Validation(format!(
                "subtask {} complexity must be between 0 and 100, got {complexity}",
                self.id
            )));
        }
        self.estimated_complexity = complexity;
        Ok(self)
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if dep == self.id {
                return Err(OrchestratorError::Validation(format!(
                    "subtask {} cannot depend on itself",
                    self.id
                )));
            }
            self.dependencies.insert(dep);
        }
        Ok(self)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn status(&self) -> SubTaskStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending and every dependency completed.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == SubTaskStatus::Pending
            && self.dependencies.iter().all(|d| completed.contains(d))
    }

    pub fn start(&mut self, agent_id: Option<String>) -> Result<()> {
        self.transition_to(SubTaskStatus::InProgress)?;
        self.assigned_agent_id = agent_id;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition_to(SubTaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition_to(SubTaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition_to(&mut self, next: SubTaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            let allowed = self
                .status
                .allowed_next()
                .iter()
                .map(SubTaskStatus::as_str)
                .collect::<Vec<_>>();
            return Err(OrchestratorError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: next.to_string(),
                allowed: if allowed.is_empty() {
                    "none".to_string()
                } else {
                    allowed.join(", ")
                },
            });
        }
        debug!(subtask_id = %self.id, from = %self.status, to = %next, "Subtask status change");
        self.status = next;
        Ok(())
    }
}
