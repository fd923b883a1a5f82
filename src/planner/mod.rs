//! Planning and execution.
//!
//! This module compares desired and applied state, turns the differences
//! into an ordered plan and executes it:
//! - Per-resource diffing against attribute schemas
//! - Plan construction with delete-aware ordering
//! - Concurrent execution with failure isolation

mod diff;
mod executor;
mod plan;

pub use diff::{ActionType, AttributeChange, DiffEngine, DiffResult, ResourceDiff};
pub use executor::{
    ActionEvent, ActionPhase, ActionReport, ApplyExecutor, ApplyReport, DEFAULT_MAX_PARALLELISM,
    ResourceStatus,
};
pub use plan::{Plan, PlanSummary, PlannedAction};
