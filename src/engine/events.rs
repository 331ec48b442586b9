// src/engine/events.rs

use serde::Serialize;

use crate::status::StepResult;

/// A status change for a cell (`artifact_index` set) or for a step as a
/// whole (`artifact_index` unset).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub step_index: usize,
    pub artifact_index: Option<usize>,
    pub result: StepResult,
}

impl StatusEvent {
    pub fn cell(step_index: usize, artifact_index: usize, result: StepResult) -> Self {
        Self {
            step_index,
            artifact_index: Some(artifact_index),
            result,
        }
    }

    pub fn step(step_index: usize, result: StepResult) -> Self {
        Self {
            step_index,
            artifact_index: None,
            result,
        }
    }
}
