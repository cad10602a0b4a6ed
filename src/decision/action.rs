use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Proceed,
    Clarify,
    Escalate,
    Retry,
    Checkpoint,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        Self::Proceed,
        Self::Clarify,
        Self::Escalate,
        Self::Retry,
        Self::Checkpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Clarify => "clarify",
            Self::Escalate => "escalate",
            Self::Retry => "retry",
            Self::Checkpoint => "checkpoint",
        }
    }

    /// Whether the surrounding system should keep executing without a human.
    pub fn continues_autonomously(&self) -> bool {
        matches!(self, Self::Proceed | Self::Checkpoint | Self::Retry)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decision. Created per `decide` call and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub confidence: f64,
    pub explanation: String,
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub(crate) fn new(action_type: ActionType, confidence: f64, explanation: impl Into<String>) -> Self {
        Self {
            action_type,
            confidence: confidence.clamp(0.0, 1.0),
            explanation: explanation.into(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// First matched breakpoint type, when the breakpoint check escalated.
    pub fn breakpoint_reason(&self) -> Option<&str> {
        self.metadata.get("breakpoint_reason").and_then(Value::as_str)
    }

    pub fn ambiguities(&self) -> Vec<&str> {
        self.metadata
            .get("ambiguities")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Observed result of acting on a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    /// Success clears the task's retry counter.
    #[serde(default)]
    pub task_id: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            task_id: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}
