use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::breakpoint::BreakpointManager;
use crate::config::DecisionConfig;

use super::action::{Action, ActionType, Outcome};
use super::confidence::{ConfidenceBreakdown, compute_confidence};
use super::context::DecisionContext;

const UNNAMED_TASK: &str = "default";

/// One decision together with the context it was made from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub action: Action,
    pub context: DecisionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStatistics {
    pub total_decisions: u64,
    pub per_action: BTreeMap<ActionType, u64>,
    /// Mean confidence over the retained history.
    pub mean_confidence: f64,
    pub success_rates: BTreeMap<ActionType, f64>,
    pub total_retries: u64,
    pub breakpoint_escalations: u64,
    pub outcomes_recorded: u64,
    pub history_len: usize,
}

/// Copy of the engine's adaptive state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub history: Vec<DecisionRecord>,
    pub success_rates: BTreeMap<ActionType, f64>,
    pub retry_counts: BTreeMap<String, u32>,
    pub proceeds_since_checkpoint: u32,
}

#[derive(Debug)]
struct EngineState {
    history: VecDeque<DecisionRecord>,
    success_rates: BTreeMap<ActionType, f64>,
    retry_counts: HashMap<String, u32>,
    proceeds_since_checkpoint: u32,
    total_decisions: u64,
    per_action: BTreeMap<ActionType, u64>,
    total_retries: u64,
    breakpoint_escalations: u64,
    outcomes_recorded: u64,
}

impl EngineState {
    fn new(config: &DecisionConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.max_history.min(1024)),
            success_rates: ActionType::ALL
                .into_iter()
                .map(|t| (t, config.initial_success_rate))
                .collect(),
            retry_counts: HashMap::new(),
            proceeds_since_checkpoint: 0,
            total_decisions: 0,
            per_action: BTreeMap::new(),
            total_retries: 0,
            breakpoint_escalations: 0,
            outcomes_recorded: 0,
        }
    }

    fn success_rate(&self, action_type: ActionType) -> f64 {
        self.success_rates.get(&action_type).copied().unwrap_or(0.5)
    }
}

/// Chooses the next action for a task.
///
/// Breakpoint matches always escalate. Otherwise the blended confidence and
/// the quality/validation verdicts select proceed, clarify, escalate or retry.
/// Adaptive state lives behind one lock on the instance.
pub struct DecisionEngine {
    config: DecisionConfig,
    breakpoints: Arc<BreakpointManager>,
    state: Mutex<EngineState>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, breakpoints: Arc<BreakpointManager>) -> Self {
        let state = EngineState::new(&config);
        Self {
            config,
            breakpoints,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointManager> {
        &self.breakpoints
    }

    /// Never fails: any context, including an empty one, yields an action.
    ///
    /// A context that qualifies for proceed yields `Proceed`, except that every
    /// `checkpoint_interval`-th qualifying decision (the 10th by default)
    /// yields `Checkpoint` instead. Both continue autonomously. An interval of
    /// 0 disables checkpoints.
    pub fn decide(&self, context: &DecisionContext) -> Action {
        let mut state = self.state.lock();
        let task_key = context.task_id.as_deref().unwrap_or(UNNAMED_TASK).to_string();
        let retry_count = state.retry_counts.get(&task_key).copied().unwrap_or(0);

        let breakdown = compute_confidence(
            context,
            state.success_rate(ActionType::Proceed),
            &self.config.weights,
        );
        let confidence = breakdown.overall;

        let matched = self
            .breakpoints
            .evaluate_conditions(&context.breakpoint_context(confidence, retry_count));

        let action = if let Some(first) = matched.first() {
            state.breakpoint_escalations += 1;
            let types: Vec<Value> = matched.iter().map(|t| Value::from(t.as_str())).collect();
            Action::new(
                ActionType::Escalate,
                confidence,
                format!("Breakpoint {first} requires review before continuing"),
            )
            .with_metadata("breakpoint_reason", first.as_str())
            .with_metadata("breakpoint_types", types)
        } else {
            self.classify(&mut state, context, confidence, &task_key, retry_count)
        };

        let action = action
            .with_metadata("retry_count", state.retry_counts.get(&task_key).copied().unwrap_or(0))
            .with_metadata("signals", signals_value(&breakdown));

        state.total_decisions += 1;
        *state.per_action.entry(action.action_type).or_default() += 1;
        state.history.push_back(DecisionRecord {
            action: action.clone(),
            context: context.clone(),
        });
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
        drop(state);

        info!(
            task_id = %task_key,
            action = action.action_type.as_str(),
            confidence = action.confidence,
            "Decision made"
        );
        action
    }

    fn classify(
        &self,
        state: &mut EngineState,
        context: &DecisionContext,
        confidence: f64,
        task_key: &str,
        retry_count: u32,
    ) -> Action {
        let gate_passed = context.quality_gate_passed.unwrap_or(false);
        let validation_passed = context.validation.as_ref().is_some_and(|v| v.passes());

        if confidence >= self.config.high_confidence && gate_passed && validation_passed {
            state.retry_counts.remove(task_key);
            state.proceeds_since_checkpoint += 1;
            let interval = self.config.checkpoint_interval;
            if interval > 0 && state.proceeds_since_checkpoint >= interval {
                state.proceeds_since_checkpoint = 0;
                debug!(interval, "Checkpoint interval reached");
                return Action::new(
                    ActionType::Checkpoint,
                    confidence,
                    format!("Checkpoint after {interval} proceeds"),
                );
            }
            return Action::new(
                ActionType::Proceed,
                confidence,
                "High confidence with passing quality gate and validation",
            );
        }

        if confidence >= self.config.medium_confidence && confidence < self.config.high_confidence {
            let ambiguities = detect_ambiguities(context);
            return Action::new(
                ActionType::Clarify,
                confidence,
                format!("Moderate confidence; {} point(s) need clarification", ambiguities.len()),
            )
            .with_metadata("ambiguities", ambiguities);
        }

        if confidence < self.config.medium_confidence {
            return Action::new(
                ActionType::Escalate,
                confidence,
                "Confidence below the escalation threshold",
            );
        }

        let attempts = retry_count + 1;
        state.retry_counts.insert(task_key.to_string(), attempts);
        state.total_retries += 1;
        let reason = if gate_passed {
            "validation did not report complete and valid"
        } else {
            "quality gate not passed"
        };
        Action::new(
            ActionType::Retry,
            confidence,
            format!("High confidence but {reason}; retry attempt {attempts}"),
        )
    }

    /// Move an action type's tracked success rate toward the observed outcome.
    pub fn learn_from_outcome(&self, action_type: ActionType, outcome: &Outcome) {
        let mut state = self.state.lock();
        let target = if outcome.success { 1.0 } else { 0.0 };
        let current = state.success_rate(action_type);
        let updated = (current + self.config.learning_rate * (target - current)).clamp(0.0, 1.0);
        state.success_rates.insert(action_type, updated);
        state.outcomes_recorded += 1;

        if outcome.success
            && let Some(task_id) = &outcome.task_id
        {
            state.retry_counts.remove(task_id);
        }

        if updated < 0.2 && current >= 0.2 {
            warn!(action = action_type.as_str(), rate = updated, "Success rate dropped below 0.2");
        }
        debug!(action = action_type.as_str(), from = current, to = updated, "Success rate updated");
    }

    pub fn success_rate(&self, action_type: ActionType) -> f64 {
        self.state.lock().success_rate(action_type)
    }

    pub fn retry_count(&self, task_id: &str) -> u32 {
        self.state.lock().retry_counts.get(task_id).copied().unwrap_or(0)
    }

    /// Retained decisions, oldest first.
    pub fn history(&self) -> Vec<DecisionRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn statistics(&self) -> DecisionStatistics {
        let state = self.state.lock();
        let mean_confidence = if state.history.is_empty() {
            0.0
        } else {
            state.history.iter().map(|r| r.action.confidence).sum::<f64>() / state.history.len() as f64
        };
        DecisionStatistics {
            total_decisions: state.total_decisions,
            per_action: state.per_action.clone(),
            mean_confidence,
            success_rates: state.success_rates.clone(),
            total_retries: state.total_retries,
            breakpoint_escalations: state.breakpoint_escalations,
            outcomes_recorded: state.outcomes_recorded,
            history_len: state.history.len(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock();
        EngineSnapshot {
            history: state.history.iter().cloned().collect(),
            success_rates: state.success_rates.clone(),
            retry_counts: state
                .retry_counts
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            proceeds_since_checkpoint: state.proceeds_since_checkpoint,
        }
    }

    /// Drop history, counters and learned rates.
    pub fn reset(&self) {
        *self.state.lock() = EngineState::new(&self.config);
    }
}

fn signals_value(breakdown: &ConfidenceBreakdown) -> Value {
    serde_json::to_value(breakdown).unwrap_or(Value::Null)
}

/// Reasons a moderately confident result still needs a human answer.
fn detect_ambiguities(context: &DecisionContext) -> Vec<String> {
    let mut ambiguities = Vec::new();

    match &context.validation {
        Some(v) if !v.complete => ambiguities.push("Response is incomplete".to_string()),
        None => ambiguities.push("No validation report available".to_string()),
        _ => {}
    }
    if let Some(v) = &context.validation
        && !v.valid
    {
        ambiguities.push("Validation reported the response as invalid".to_string());
    }

    match (context.quality_score, context.quality_gate_passed) {
        (Some(score), _) if score < 0.7 => {
            ambiguities.push(format!("Quality score {score:.2} is below threshold"))
        }
        (_, Some(false)) => ambiguities.push("Quality gate not passed".to_string()),
        _ => {}
    }

    if let Some(response) = &context.response {
        let markers = response.matches("TODO").count() + response.matches("FIXME").count();
        if markers > 0 {
            ambiguities.push(format!("{markers} unresolved TODO/FIXME marker(s) in response"));
        }
    }

    if let Some(v) = &context.validation {
        ambiguities.extend(v.issues.iter().map(|i| format!("Validation issue: {i}")));
    }

    ambiguities
}
