// src/engine/state.rs

//! Pure flow state.
//!
//! [`FlowState`] owns the (step x artifact) result matrix and the per-step
//! aggregates. It is synchronous and does no IO: the runtime feeds it one
//! [`StatusEvent`] at a time and publishes a clone after each applied event.
//! The by-artifact view is rebuilt wholesale from the by-step matrix on every
//! application and never patched on its own.

use serde::Serialize;

use crate::dag::Graph;
use crate::engine::events::StatusEvent;
use crate::errors::{MonoflowError, Result};
use crate::status::{
    AbortedResult, DoneResult, ErrorInfo, ExecutionStatus, Status, StepResult, combine_statuses,
};
use crate::steps::info::StepInfo;
use crate::workspace::Artifact;

/// One row of the by-step matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultOfArtifacts {
    pub step_index: usize,
    pub step_info: StepInfo,
    /// The step as a whole.
    pub step_result: StepResult,
    /// Indexed by artifact index.
    pub artifacts_result: Vec<StepResult>,
}

/// One row of the transposed by-artifact view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsResultOfArtifact {
    pub artifact_index: usize,
    pub artifact_name: String,
    /// Indexed by step index.
    pub steps_result: Vec<StepResult>,
}

/// Whether an event changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The event would not move the target forward (duplicate or regression).
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    steps_result_of_artifacts_by_step: Vec<StepResultOfArtifacts>,
    steps_result_of_artifacts_by_artifact: Vec<StepsResultOfArtifact>,
}

impl FlowState {
    /// Every cell and every step starts `scheduled`.
    pub fn new(steps: &Graph<StepInfo>, artifacts: &Graph<Artifact>) -> Self {
        let by_step = steps
            .nodes()
            .iter()
            .map(|step| StepResultOfArtifacts {
                step_index: step.index,
                step_info: step.data.clone(),
                step_result: StepResult::Scheduled,
                artifacts_result: vec![StepResult::Scheduled; artifacts.len()],
            })
            .collect();

        let by_artifact = artifacts
            .nodes()
            .iter()
            .map(|artifact| StepsResultOfArtifact {
                artifact_index: artifact.index,
                artifact_name: artifact.data.name().to_string(),
                steps_result: Vec::new(),
            })
            .collect();

        let mut state = Self {
            steps_result_of_artifacts_by_step: by_step,
            steps_result_of_artifacts_by_artifact: by_artifact,
        };
        state.rebuild_by_artifact();
        state
    }

    pub fn by_step(&self) -> &[StepResultOfArtifacts] {
        &self.steps_result_of_artifacts_by_step
    }

    pub fn by_artifact(&self) -> &[StepsResultOfArtifact] {
        &self.steps_result_of_artifacts_by_artifact
    }

    pub fn step_result(&self, step_index: usize) -> Option<&StepResult> {
        self.steps_result_of_artifacts_by_step
            .get(step_index)
            .map(|row| &row.step_result)
    }

    pub fn cell(&self, step_index: usize, artifact_index: usize) -> Option<&StepResult> {
        self.steps_result_of_artifacts_by_step
            .get(step_index)
            .and_then(|row| row.artifacts_result.get(artifact_index))
    }

    /// Whether every cell of `step_index` is done or aborted.
    pub fn step_cells_terminal(&self, step_index: usize) -> bool {
        self.steps_result_of_artifacts_by_step
            .get(step_index)
            .is_some_and(|row| row.artifacts_result.iter().all(StepResult::is_terminal))
    }

    /// Whether every step aggregate is done or aborted.
    pub fn is_complete(&self) -> bool {
        self.steps_result_of_artifacts_by_step
            .iter()
            .all(|row| row.step_result.is_terminal())
    }

    pub fn unfinished_steps(&self) -> Vec<&str> {
        self.steps_result_of_artifacts_by_step
            .iter()
            .filter(|row| !row.step_result.is_terminal())
            .map(|row| row.step_info.display_name.as_str())
            .collect()
    }

    /// Combined status over every terminal step aggregate.
    pub fn combined_status(&self) -> Status {
        combine_statuses(
            self.steps_result_of_artifacts_by_step
                .iter()
                .filter_map(|row| row.step_result.status()),
        )
    }

    /// Apply one event.
    ///
    /// Transitions only move forward through
    /// `scheduled -> running -> {done | aborted}`; anything else is ignored.
    /// A step aggregate that contradicts its cells is an invariant
    /// violation.
    pub fn apply(&mut self, event: &StatusEvent) -> Result<Transition> {
        let row = self
            .steps_result_of_artifacts_by_step
            .get_mut(event.step_index)
            .ok_or_else(|| {
                MonoflowError::InvariantViolation(format!(
                    "event for unknown step index {}",
                    event.step_index
                ))
            })?;

        match event.artifact_index {
            Some(artifact_index) => {
                let step_terminal = row.step_result.is_terminal();
                let cell = row.artifacts_result.get_mut(artifact_index).ok_or_else(|| {
                    MonoflowError::InvariantViolation(format!(
                        "event for unknown artifact index {artifact_index} in step '{}'",
                        row.step_info.display_name
                    ))
                })?;

                if !advances(cell, &event.result) {
                    return Ok(Transition::Ignored("cell does not move forward"));
                }
                if step_terminal {
                    return Err(MonoflowError::InvariantViolation(format!(
                        "cell {artifact_index} of step '{}' changed after the step finished",
                        row.step_info.display_name
                    )));
                }
                *cell = event.result.clone();
            }
            None => {
                if !advances(&row.step_result, &event.result) {
                    return Ok(Transition::Ignored("step does not move forward"));
                }
                if event.result.is_terminal() {
                    check_aggregate(row, &event.result)?;
                }
                row.step_result = event.result.clone();
            }
        }

        self.rebuild_by_artifact();
        Ok(Transition::Applied)
    }

    fn rebuild_by_artifact(&mut self) {
        for (artifact_index, view) in self
            .steps_result_of_artifacts_by_artifact
            .iter_mut()
            .enumerate()
        {
            view.steps_result = self
                .steps_result_of_artifacts_by_step
                .iter()
                .map(|row| {
                    row.artifacts_result
                        .get(artifact_index)
                        .cloned()
                        .unwrap_or(StepResult::Scheduled)
                })
                .collect();
        }
    }
}

fn advances(current: &StepResult, next: &StepResult) -> bool {
    next.execution_status().rank() > current.execution_status().rank()
}

fn check_aggregate(row: &StepResultOfArtifacts, aggregate: &StepResult) -> Result<()> {
    let name = &row.step_info.display_name;
    if !row.artifacts_result.iter().all(StepResult::is_terminal) {
        return Err(MonoflowError::InvariantViolation(format!(
            "step '{name}' finished while some of its cells are still pending"
        )));
    }

    let any_done = row
        .artifacts_result
        .iter()
        .any(|r| r.execution_status() == ExecutionStatus::Done);

    match aggregate.execution_status() {
        ExecutionStatus::Done if !any_done => {
            return Err(MonoflowError::InvariantViolation(format!(
                "step '{name}' is done but none of its cells ran"
            )));
        }
        ExecutionStatus::Aborted if any_done => {
            return Err(MonoflowError::InvariantViolation(format!(
                "step '{name}' is aborted but some of its cells ran"
            )));
        }
        _ => {}
    }

    let cells = combine_statuses(row.artifacts_result.iter().filter_map(StepResult::status));
    if let Some(status) = aggregate.status() {
        if !row.artifacts_result.is_empty() && status < cells {
            return Err(MonoflowError::InvariantViolation(format!(
                "step '{name}' reports {status} but its cells combine to {cells}"
            )));
        }
    }
    Ok(())
}

/// Aggregate result of a step whose cells are all terminal.
///
/// `done` with the combined cell status if at least one cell is done,
/// otherwise `aborted` with the same rule. Step-level errors on a done step
/// raise its status to at least `failed`. A step with no cells is
/// `aborted` / `skippedAsPassed`.
pub fn aggregate_step_result(
    cells: &[StepResult],
    duration_ms: u64,
    notes: Vec<String>,
    errors: Vec<ErrorInfo>,
) -> Result<StepResult> {
    if let Some(pending) = cells.iter().position(|c| !c.is_terminal()) {
        return Err(MonoflowError::InvariantViolation(format!(
            "cannot aggregate: cell {pending} is not terminal"
        )));
    }

    let combined = combine_statuses(cells.iter().filter_map(StepResult::status));
    let any_done = cells
        .iter()
        .any(|c| c.execution_status() == ExecutionStatus::Done);

    let result = if any_done {
        let status = if errors.is_empty() {
            combined
        } else {
            combined.max(Status::Failed)
        };
        StepResult::Done(DoneResult {
            status,
            duration_ms,
            notes,
            errors,
        })
    } else {
        StepResult::Aborted(AbortedResult {
            status: combined,
            duration_ms: Some(duration_ms),
            notes,
            errors,
        })
    };
    Ok(result)
}
