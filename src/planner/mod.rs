//! Stack planning.
//!
//! Plans are computed by the orchestrator without side effects and
//! rendered by the CLI before an apply.

mod plan;

pub use plan::{PlanSummary, PlannedAction, PlannedChange, StackPlan};
