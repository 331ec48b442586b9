// src/engine/mod.rs

//! DAG scheduler for the (step x artifact) matrix.
//!
//! This module ties together:
//! - the pure flow state ([`state`]), which owns every cell and step result
//! - the single-writer runtime ([`runtime`]) that applies status events in
//!   arrival order, writes terminal results through to the cache and
//!   publishes snapshots
//! - one worker per step ([`worker`]) that waits for its inputs, evaluates
//!   constraints and runs the step's logic
//! - the once-per-step hook queue ([`hook_queue`])
//!
//! [`Flow`] wires them up for one run.

pub mod events;
pub mod flow;
pub(crate) mod guard;
pub(crate) mod hook_queue;
pub mod runtime;
pub mod state;
pub(crate) mod worker;

pub use events::StatusEvent;
pub use flow::Flow;
pub use runtime::FlowRuntime;
pub use state::{
    FlowState, StepResultOfArtifacts, StepsResultOfArtifact, Transition, aggregate_step_result,
};
