pub mod breakpoint;
pub mod config;
pub mod decision;
pub mod error;
pub mod logging;
pub mod planning;
pub mod quality;
pub mod sink;
pub mod utils;

pub use breakpoint::{BreakpointEvent, BreakpointManager, BreakpointRule, BreakpointType, Condition};
pub use config::OrchestratorConfig;
pub use decision::{Action, ActionType, DecisionContext, DecisionEngine, Outcome};
pub use error::{OrchestratorError, Result};
pub use planning::{ComplexityEstimate, ComplexityEstimator, EstimationContext, SubTask};
pub use quality::{QualityContext, QualityController, QualityResult, ValidationStrategy};
pub use sink::{JsonlLogSink, LogRecord, LogSink};
