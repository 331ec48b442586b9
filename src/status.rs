// src/status.rs

//! Shared vocabulary of execution phases and outcome statuses.
//!
//! Every cell of the (step x artifact) matrix, and every step as a whole,
//! holds a [`StepResult`]. Only the terminal variants carry a [`Status`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a unit of work.
///
/// Variants are declared in increasing order of severity so that the
/// derived `Ord` doubles as the combination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Passed,
    SkippedAsPassed,
    SkippedAsFailed,
    Failed,
}

impl Status {
    /// Whether this status should make the flow exit non-zero.
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failed | Status::SkippedAsFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::SkippedAsPassed => "skipped-as-passed",
            Status::SkippedAsFailed => "skipped-as-failed",
        };
        f.write_str(s)
    }
}

/// Combine statuses using the severity order
/// `failed > skippedAsFailed > skippedAsPassed > passed`.
///
/// An empty input combines to `skippedAsPassed`.
pub fn combine_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    statuses.into_iter().max().unwrap_or(Status::SkippedAsPassed)
}

/// State-machine phase of a cell or a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Scheduled,
    Running,
    Done,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Done | ExecutionStatus::Aborted)
    }

    /// Position in the `scheduled -> running -> {done | aborted}` order.
    pub(crate) fn rank(self) -> u8 {
        match self {
            ExecutionStatus::Scheduled => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Done | ExecutionStatus::Aborted => 2,
        }
    }
}

/// Serializable error captured at a cell boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Render an `anyhow` error including its context chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Payload of a cell that actually executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneResult {
    pub status: Status,
    pub duration_ms: u64,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
}

/// Payload of a cell that a constraint kept from executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortedResult {
    pub status: Status,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
}

/// Result of a cell or a step, tagged by its [`ExecutionStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "executionStatus", rename_all = "camelCase")]
pub enum StepResult {
    Scheduled,
    Running,
    Done(DoneResult),
    Aborted(AbortedResult),
}

impl StepResult {
    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            StepResult::Scheduled => ExecutionStatus::Scheduled,
            StepResult::Running => ExecutionStatus::Running,
            StepResult::Done(_) => ExecutionStatus::Done,
            StepResult::Aborted(_) => ExecutionStatus::Aborted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.execution_status().is_terminal()
    }

    /// Outcome status, present only on terminal results.
    pub fn status(&self) -> Option<Status> {
        match self {
            StepResult::Done(done) => Some(done.status),
            StepResult::Aborted(aborted) => Some(aborted.status),
            StepResult::Scheduled | StepResult::Running => None,
        }
    }

    pub fn notes(&self) -> &[String] {
        match self {
            StepResult::Done(done) => &done.notes,
            StepResult::Aborted(aborted) => &aborted.notes,
            StepResult::Scheduled | StepResult::Running => &[],
        }
    }

    pub fn errors(&self) -> &[ErrorInfo] {
        match self {
            StepResult::Done(done) => &done.errors,
            StepResult::Aborted(aborted) => &aborted.errors,
            StepResult::Scheduled | StepResult::Running => &[],
        }
    }

    pub fn done(status: Status, duration_ms: u64) -> Self {
        StepResult::Done(DoneResult {
            status,
            duration_ms,
            notes: Vec::new(),
            errors: Vec::new(),
        })
    }

    pub fn aborted(status: Status, notes: Vec<String>, errors: Vec<ErrorInfo>) -> Self {
        StepResult::Aborted(AbortedResult {
            status,
            duration_ms: None,
            notes,
            errors,
        })
    }
}

/// Append notes, skipping ones already present.
pub(crate) fn push_unique_notes<I>(target: &mut Vec<String>, notes: I)
where
    I: IntoIterator<Item = String>,
{
    for note in notes {
        if !target.contains(&note) {
            target.push(note);
        }
    }
}
