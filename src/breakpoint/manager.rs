use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::BreakpointConfig;
use crate::error::{OrchestratorError, Result};

use super::condition::ContextMap;
use super::event::BreakpointEvent;
use super::rules::{AutoResolution, BreakpointRule, BreakpointType, NotificationPolicy, Priority, default_rules};

/// Receives `(event, rule)` when a rule's notification policy requires it.
pub type NotificationCallback =
    Arc<dyn Fn(&BreakpointEvent, &BreakpointRule) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStatistics {
    pub triggered: u64,
    pub resolved: u64,
    pub auto_resolved: u64,
    pub total_resolution_secs: f64,
}

impl TypeStatistics {
    pub fn mean_resolution_secs(&self) -> Option<f64> {
        (self.resolved > 0).then(|| self.total_resolution_secs / self.resolved as f64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakpointStatistics {
    pub per_type: BTreeMap<String, TypeStatistics>,
    pub total_events: usize,
    pub pending_events: usize,
    pub queued_notifications: usize,
}

#[derive(Default)]
struct ManagerState {
    /// Registration order; evaluation sorts a copy by priority.
    rules: Vec<BreakpointRule>,
    disabled: HashSet<BreakpointType>,
    events: HashMap<String, Vec<BreakpointEvent>>,
    /// event id -> project bucket
    event_index: HashMap<String, String>,
    stats: BTreeMap<BreakpointType, TypeStatistics>,
    batched: Vec<(BreakpointEvent, BreakpointRule)>,
}

impl ManagerState {
    fn rule(&self, breakpoint_type: &BreakpointType) -> Option<&BreakpointRule> {
        self.rules
            .iter()
            .find(|r| &r.breakpoint_type == breakpoint_type)
    }

    fn event_mut(&mut self, event_id: &str) -> Option<&mut BreakpointEvent> {
        let project = self.event_index.get(event_id)?;
        self.events
            .get_mut(project)?
            .iter_mut()
            .find(|e| e.id == event_id)
    }
}

/// Rule-driven interrupt system.
///
/// Rule tables, event stores and statistics sit behind one lock. Callbacks
/// run after the lock is released; a failing or panicking callback is logged
/// and never stops the others.
pub struct BreakpointManager {
    config: BreakpointConfig,
    state: Mutex<ManagerState>,
    callbacks: RwLock<Vec<NotificationCallback>>,
}

impl BreakpointManager {
    pub fn new(config: BreakpointConfig) -> Self {
        let state = ManagerState {
            rules: default_rules(&config),
            disabled: config.disabled.iter().cloned().collect(),
            ..ManagerState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Add a rule, replacing any existing rule of the same type.
    pub fn register_rule(&self, rule: BreakpointRule) -> Result<()> {
        rule.validate()?;
        let mut state = self.state.lock();
        let existing = state
            .rules
            .iter()
            .position(|r| r.breakpoint_type == rule.breakpoint_type);
        match existing {
            Some(pos) => {
                debug!(breakpoint_type = %rule.breakpoint_type, "Replacing breakpoint rule");
                state.rules[pos] = rule;
            }
            None => {
                debug!(breakpoint_type = %rule.breakpoint_type, "Registered breakpoint rule");
                state.rules.push(rule);
            }
        }
        Ok(())
    }

    pub fn disable(&self, breakpoint_type: &BreakpointType) -> Result<()> {
        let mut state = self.state.lock();
        if state.rule(breakpoint_type).is_none() {
            return Err(OrchestratorError::UnknownBreakpointType(breakpoint_type.to_string()));
        }
        state.disabled.insert(breakpoint_type.clone());
        Ok(())
    }

    pub fn enable(&self, breakpoint_type: &BreakpointType) -> Result<()> {
        let mut state = self.state.lock();
        if state.rule(breakpoint_type).is_none() {
            return Err(OrchestratorError::UnknownBreakpointType(breakpoint_type.to_string()));
        }
        state.disabled.remove(breakpoint_type);
        Ok(())
    }

    pub fn is_enabled(&self, breakpoint_type: &BreakpointType) -> bool {
        let state = self.state.lock();
        state
            .rule(breakpoint_type)
            .is_some_and(|r| r.enabled && !state.disabled.contains(breakpoint_type))
    }

    pub fn rules(&self) -> Vec<BreakpointRule> {
        self.state.lock().rules.clone()
    }

    pub fn on_notify(&self, callback: NotificationCallback) {
        self.callbacks.write().push(callback);
    }

    /// Types whose full condition conjunction holds, high priority first.
    ///
    /// Within one priority, registration order is kept. A condition that
    /// cannot be evaluated leaves its rule unmatched.
    pub fn evaluate_conditions(&self, context: &ContextMap) -> Vec<BreakpointType> {
        if !self.config.enabled {
            return Vec::new();
        }

        let state = self.state.lock();
        let mut candidates: Vec<&BreakpointRule> = state
            .rules
            .iter()
            .filter(|r| r.enabled && !state.disabled.contains(&r.breakpoint_type))
            .collect();
        candidates.sort_by_key(|r| r.priority);

        let mut matched = Vec::new();
        for rule in candidates {
            let merged = self.merged_context(context, rule);
            let mut holds = true;
            for condition in &rule.conditions {
                match condition.evaluate(&merged) {
                    Ok(true) => {}
                    Ok(false) => {
                        holds = false;
                        break;
                    }
                    Err(e) => {
                        debug!(breakpoint_type = %rule.breakpoint_type, condition = %condition, error = %e, "Condition not evaluable");
                        holds = false;
                        break;
                    }
                }
            }
            if holds {
                matched.push(rule.breakpoint_type.clone());
            }
        }

        if !matched.is_empty() {
            debug!(matched = ?matched, "Breakpoint conditions matched");
        }
        matched
    }

    /// Caller context, then rule thresholds, then configured overrides.
    fn merged_context(&self, context: &ContextMap, rule: &BreakpointRule) -> ContextMap {
        let mut merged = context.clone();
        for (name, value) in &rule.thresholds {
            let value = self
                .config
                .threshold_overrides
                .get(name)
                .copied()
                .unwrap_or(*value);
            merged.insert(name.clone(), json!(value));
        }
        merged
    }

    pub fn trigger(
        &self,
        breakpoint_type: &BreakpointType,
        context: ContextMap,
    ) -> Result<BreakpointEvent> {
        let (event, notify_rule) = {
            let mut state = self.state.lock();
            let rule = state
                .rule(breakpoint_type)
                .cloned()
                .ok_or_else(|| OrchestratorError::UnknownBreakpointType(breakpoint_type.to_string()))?;

            let mut event = BreakpointEvent::new(breakpoint_type.clone(), rule.priority, context);
            let retry_at = match &rule.auto_resolution {
                Some(AutoResolution::WaitAndRetry { wait_secs }) => Some(
                    i64::try_from(*wait_secs)
                        .ok()
                        .and_then(Duration::try_seconds)
                        .and_then(|wait| event.triggered_at.checked_add_signed(wait))
                        .ok_or_else(|| {
                            OrchestratorError::Validation(format!(
                                "wait_secs {wait_secs} for {breakpoint_type} is out of range"
                            ))
                        })?,
                ),
                _ => None,
            };
            let stats = state.stats.entry(breakpoint_type.clone()).or_default();
            stats.triggered += 1;

            let mut notify_rule = None;
            if let Some(action) = &rule.auto_resolution {
                let (resolved_at, resolution) = match action {
                    AutoResolution::WaitAndRetry { wait_secs } => (
                        retry_at.unwrap_or(event.triggered_at),
                        json!({"action": action.as_str(), "wait_seconds": wait_secs}),
                    ),
                    AutoResolution::CancelAndRetry => {
                        (event.triggered_at, json!({"action": action.as_str()}))
                    }
                };
                event.mark_resolved(resolved_at, resolution, true);
                stats.resolved += 1;
                stats.auto_resolved += 1;
                stats.total_resolution_secs += event
                    .resolution_time()
                    .map(|d| d.num_milliseconds() as f64 / 1000.0)
                    .unwrap_or(0.0);
                info!(
                    event_id = %event.id,
                    breakpoint_type = %breakpoint_type,
                    action = action.as_str(),
                    "Breakpoint auto-resolved"
                );
            } else {
                info!(
                    event_id = %event.id,
                    breakpoint_type = %breakpoint_type,
                    priority = rule.priority.as_str(),
                    project_id = %event.project_id,
                    "Breakpoint triggered"
                );
                let notify_now = rule.notification == NotificationPolicy::Immediate
                    || matches!(rule.priority, Priority::High | Priority::Medium);
                if notify_now {
                    notify_rule = Some(rule);
                } else {
                    state.batched.push((event.clone(), rule));
                }
            }

            state
                .event_index
                .insert(event.id.clone(), event.project_id.clone());
            state
                .events
                .entry(event.project_id.clone())
                .or_default()
                .push(event.clone());
            (event, notify_rule)
        };

        if let Some(rule) = notify_rule {
            self.dispatch(&event, &rule);
        }
        Ok(event)
    }

    /// Resolve a pending event exactly once.
    pub fn resolve(&self, event_id: &str, resolution: Value) -> Result<BreakpointEvent> {
        let mut state = self.state.lock();
        let event = state
            .event_mut(event_id)
            .ok_or_else(|| OrchestratorError::EventNotFound(event_id.to_string()))?;
        if !event.is_pending() {
            return Err(OrchestratorError::EventAlreadyResolved(event_id.to_string()));
        }

        event.mark_resolved(Utc::now(), resolution, false);
        let resolved = event.clone();

        let stats = state.stats.entry(resolved.breakpoint_type.clone()).or_default();
        stats.resolved += 1;
        stats.total_resolution_secs += resolved
            .resolution_time()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        info!(event_id = %event_id, breakpoint_type = %resolved.breakpoint_type, "Breakpoint resolved");
        Ok(resolved)
    }

    pub fn is_pending(&self, event_id: &str) -> Result<bool> {
        self.get_event(event_id)
            .map(|e| e.is_pending())
            .ok_or_else(|| OrchestratorError::EventNotFound(event_id.to_string()))
    }

    pub fn get_event(&self, event_id: &str) -> Option<BreakpointEvent> {
        self.state.lock().event_mut(event_id).cloned()
    }

    pub fn events(&self, project_id: &str) -> Vec<BreakpointEvent> {
        self.state
            .lock()
            .events
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pending_events(&self, project_id: &str) -> Vec<BreakpointEvent> {
        self.events(project_id)
            .into_iter()
            .filter(BreakpointEvent::is_pending)
            .collect()
    }

    /// Deliver queued low-priority batched notifications.
    pub fn flush_batched(&self) -> usize {
        let queued = std::mem::take(&mut self.state.lock().batched);
        for (event, rule) in &queued {
            self.dispatch(event, rule);
        }
        if !queued.is_empty() {
            debug!(count = queued.len(), "Flushed batched breakpoint notifications");
        }
        queued.len()
    }

    /// Drop resolved events older than `older_than`. Returns how many went.
    pub fn purge_resolved(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now().checked_sub_signed(older_than).unwrap_or(
            if older_than > Duration::zero() {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            },
        );
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut removed = Vec::new();
        for events in state.events.values_mut() {
            events.retain(|e| {
                let stale = !e.is_pending() && e.resolved_at.is_some_and(|at| at < cutoff);
                if stale {
                    removed.push(e.id.clone());
                }
                !stale
            });
        }
        state.events.retain(|_, events| !events.is_empty());
        for id in &removed {
            state.event_index.remove(id);
        }
        removed.len()
    }

    pub fn statistics(&self) -> BreakpointStatistics {
        let state = self.state.lock();
        let all = state.events.values().flatten();
        let (total_events, pending_events) =
            all.fold((0, 0), |(t, p), e| (t + 1, p + usize::from(e.is_pending())));
        BreakpointStatistics {
            per_type: state
                .stats
                .iter()
                .map(|(t, s)| (t.to_string(), s.clone()))
                .collect(),
            total_events,
            pending_events,
            queued_notifications: state.batched.len(),
        }
    }

    fn dispatch(&self, event: &BreakpointEvent, rule: &BreakpointRule) {
        let callbacks = self.callbacks.read().clone();
        for (i, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(event, rule))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(callback = i, event_id = %event.id, error = %e, "Breakpoint notification callback failed");
                }
                Err(_) => {
                    warn!(callback = i, event_id = %event.id, "Breakpoint notification callback panicked");
                }
            }
        }
    }
}
