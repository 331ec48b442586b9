// src/report.rs

//! Flow-level outputs: the final matrices and the derived exit status.

use std::fmt::Write as _;

use serde::Serialize;

use crate::engine::FlowState;
use crate::status::{Status, StepResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub flow_id: String,
    pub repo_hash: String,
    #[serde(flatten)]
    pub state: FlowState,
}

impl FlowReport {
    /// Combination of every step aggregate.
    pub fn combined_status(&self) -> Status {
        self.state.combined_status()
    }

    pub fn is_success(&self) -> bool {
        !self.combined_status().is_failure()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text summary: one line per step, then one line per cell.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "flow {} (repo {})", self.flow_id, self.repo_hash);

        for row in self.state.by_step() {
            let _ = writeln!(
                out,
                "{:<24} {}",
                row.step_info.display_name,
                describe(&row.step_result)
            );
            for note in row.step_result.notes() {
                let _ = writeln!(out, "    note: {note}");
            }
            for (artifact_index, cell) in row.artifacts_result.iter().enumerate() {
                let name = self
                    .state
                    .by_artifact()
                    .get(artifact_index)
                    .map(|a| a.artifact_name.as_str())
                    .unwrap_or("?");
                let _ = writeln!(out, "  {:<22} {}", name, describe(cell));
                for note in cell.notes() {
                    let _ = writeln!(out, "      note: {note}");
                }
                for error in cell.errors() {
                    let _ = writeln!(out, "      error: {error}");
                }
            }
        }

        let _ = writeln!(out, "result: {}", self.combined_status());
        out
    }
}

fn describe(result: &StepResult) -> String {
    match result {
        StepResult::Scheduled => "scheduled".to_string(),
        StepResult::Running => "running".to_string(),
        StepResult::Done(done) => format!("done    {} ({} ms)", done.status, done.duration_ms),
        StepResult::Aborted(aborted) => format!("aborted {}", aborted.status),
    }
}
