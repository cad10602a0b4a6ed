use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid subtask status transition: {from} → {to} (allowed: {allowed})")]
    InvalidStatusTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Unknown breakpoint type: {0}")]
    UnknownBreakpointType(String),

    #[error("Breakpoint event not found: {0}")]
    EventNotFound(String),

    #[error("Breakpoint event already resolved: {0}")]
    EventAlreadyResolved(String),

    #[error("Advisory judgment unavailable: {0}")]
    Advisory(String),

    #[error("Advisory judgment timed out after {}s", .0.as_secs())]
    AdvisoryTimeout(Duration),

    #[error("Log sink error: {0}")]
    Sink(String),

    #[error("Notification callback failed: {0}")]
    Callback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl OrchestratorError {
    /// Caller-facing hint for failures that are surfaced rather than swallowed.
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Fix the configuration values listed and restart the component"),
            Self::Validation(_) => Some("Correct the rejected value; nothing was admitted into shared state"),
            Self::InvalidStatusTransition { .. } => {
                Some("Subtasks move pending → in_progress → completed|failed; create a new subtask to retry")
            }
            Self::UnknownBreakpointType(_) => {
                Some("Register a rule for this type with BreakpointManager::register_rule before triggering")
            }
            Self::EventNotFound(_) => Some("List pending events for the project to find a valid event id"),
            Self::EventAlreadyResolved(_) => Some("The event was resolved earlier; no further action is needed"),
            Self::Advisory(_) | Self::AdvisoryTimeout(_) => {
                Some("Heuristic estimation is used automatically when advisory judgment fails")
            }
            Self::Sink(_) | Self::Callback(_) => None,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) | Self::Regex(_) => None,
        }
    }

    /// Degraded-dependency failures are logged and swallowed at the boundary.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::Advisory(_) | Self::AdvisoryTimeout(_) | Self::Sink(_) | Self::Callback(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownBreakpointType(_) | Self::EventNotFound(_) | Self::EventAlreadyResolved(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
