//! Complexity estimation and decomposition planning.
//!
//! Runs before execution and produces a recommendation only:
//! - Heuristic scoring from task phrasing and explicit context
//! - Optional advisory judgment, blended with the heuristics
//! - Subtask suggestions with phase-derived dependencies
//! - Parallel levels (Kahn) with speedup and efficiency estimates
//!
//! Key components:
//! - `ComplexityEstimator`: Runs the full pipeline under one lock
//! - `SubTask`: Decomposed unit with a validated status lifecycle
//! - `ParallelPlan`: Level-ordered groups consumed by an external executor

mod advisory;
mod complexity;
mod decomposition;
mod estimate;
mod graph;
mod heuristics;
mod subtask;

pub use advisory::{AdvisoryAssessment, AdvisoryOutcome, AdvisorySource, build_prompt, parse_assessment};
pub use complexity::{ComplexityEstimator, EstimatorStatistics};
pub use decomposition::{Phase, TaskPattern, materialize_subtasks, suggest_subtasks};
pub use estimate::{ComplexityEstimate, EstimateSource, EstimationContext};
pub use graph::{ParallelGroup, ParallelPlan, plan_parallel_groups, ready_subtasks};
pub use heuristics::{Concept, EffortClass, HeuristicAnalysis, analyze as analyze_heuristics};
pub use subtask::{SubTask, SubTaskStatus};
