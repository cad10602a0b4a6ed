//! Next-action decisions for orchestrated tasks.
//!
//! The engine combines a breakpoint check, the quality verdict and a blended
//! confidence into one of five actions, and adapts its per-action success
//! rates from reported outcomes.

mod action;
mod confidence;
mod context;
mod engine;

pub use action::{Action, ActionType, Outcome};
pub use confidence::{ConfidenceBreakdown, assess_response, compute_confidence};
pub use context::{DecisionContext, ValidationReport};
pub use engine::{DecisionEngine, DecisionRecord, DecisionStatistics, EngineSnapshot};
