use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::ContextMap;
use super::rules::{BreakpointType, Priority};

pub const DEFAULT_PROJECT: &str = "default";

/// One raised interrupt.
///
/// Pending until resolved, either automatically at creation or exactly once
/// by an external resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointEvent {
    pub id: String,
    pub breakpoint_type: BreakpointType,
    pub priority: Priority,
    pub project_id: String,
    pub context: ContextMap,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<Value>,
    pub auto_resolved: bool,
}

impl BreakpointEvent {
    pub(crate) fn new(
        breakpoint_type: BreakpointType,
        priority: Priority,
        context: ContextMap,
    ) -> Self {
        let project_id = context
            .get("project_id")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PROJECT)
            .to_string();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            breakpoint_type,
            priority,
            project_id,
            context,
            triggered_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            auto_resolved: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.resolution.is_none()
    }

    /// Whether a caller waiting on this event may retry at `now`.
    ///
    /// Wait-and-retry resolutions carry a future `resolved_at`; the wait is
    /// cooperative, nothing fires on its own.
    pub fn retry_ready_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_pending() && self.resolved_at.is_some_and(|at| at <= now)
    }

    pub fn resolution_time(&self) -> Option<Duration> {
        self.resolved_at.map(|at| at - self.triggered_at)
    }

    pub(crate) fn mark_resolved(&mut self, at: DateTime<Utc>, resolution: Value, auto: bool) {
        self.resolved_at = Some(at);
        self.resolution = Some(resolution);
        self.auto_resolved = auto;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::context_map;
    use serde_json::json;

    #[test]
    fn test_project_bucket_from_context() {
        let e = BreakpointEvent::new(
            BreakpointType::ConfidenceTooLow,
            Priority::High,
            context_map(json!({"project_id": "alpha"})),
        );
        assert_eq!(e.project_id, "alpha");

        let e = BreakpointEvent::new(
            BreakpointType::ConfidenceTooLow,
            Priority::High,
            ContextMap::new(),
        );
        assert_eq!(e.project_id, DEFAULT_PROJECT);
        assert!(e.is_pending());
    }

    #[test]
    fn test_retry_ready_only_after_wait() {
        let mut e = BreakpointEvent::new(
            BreakpointType::RateLimitHit,
            Priority::Medium,
            ContextMap::new(),
        );
        let now = Utc::now();
        e.mark_resolved(now + Duration::seconds(60), json!({"action": "wait_and_retry"}), true);

        assert!(!e.is_pending());
        assert!(!e.retry_ready_at(now));
        assert!(e.retry_ready_at(now + Duration::seconds(61)));
        assert!(e.resolution_time().is_some_and(|d| d.num_seconds() >= 59));
    }
}
