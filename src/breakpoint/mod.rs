//! Rule-driven interrupts.
//!
//! Rules are conjunctions of [`Condition`] expressions over a context map.
//! Matching rules raise [`BreakpointEvent`]s that either resolve themselves
//! at creation (wait-and-retry, cancel-and-retry) or wait for an external
//! resolver.

mod condition;
mod event;
mod manager;
mod rules;

pub use condition::{CompareOp, Condition, ContextMap, EvalError, Operand, context_map};
pub use event::{BreakpointEvent, DEFAULT_PROJECT};
pub use manager::{BreakpointManager, BreakpointStatistics, NotificationCallback, TypeStatistics};
pub use rules::{
    AutoResolution, BreakpointRule, BreakpointType, MAX_AUTO_RESOLVE_WAIT_SECS, NotificationPolicy, Priority,
    default_rules,
};
