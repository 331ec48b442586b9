// src/steps/mod.rs

//! Step definitions and the contract step implementations fulfil.
//!
//! - [`info`]: [`StepInfo`] and the step-graph builder.
//! - [`context`]: what a step receives ([`StepContext`], [`StateReader`]).
//! - [`logic`]: what a step returns ([`StepLogic`], hooks, outcomes).
//! - [`command`]: a shell-command step driven by the config file.

pub mod command;
pub mod context;
pub mod info;
pub mod logic;

pub use command::{CommandStep, CommandStepConfig, RunOn, command_steps_from_config};
pub use context::{StateReader, StepContext};
pub use info::{StepDefinition, StepInfo, build_steps_graph};
pub use logic::{
    ArtifactHooks, ArtifactOutcome, StepFactory, StepLogic, StepOutcome, StepRun, WholeStepLogic,
};
