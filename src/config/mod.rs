//! Configuration types and loading.
//!
//! Provides the configuration structures for the orchestration core:
//! - `OrchestratorConfig`: Top-level configuration with validation
//! - `ComplexityConfig`: Estimation thresholds and blend weights
//! - `BreakpointConfig`, `QualityConfig`, `DecisionConfig`: Per-subsystem settings

mod settings;

pub use settings::{
    BreakpointConfig, ComplexityConfig, DecisionConfig, OrchestratorConfig, QualityConfig,
    SeverityDeductions, SignalWeights, StageWeights,
};
