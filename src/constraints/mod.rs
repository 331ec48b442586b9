// src/constraints/mod.rs

//! Constraint engine.
//!
//! A constraint is an async predicate over a context that votes whether a
//! unit of work should run, be skipped with a given outcome, or that it has
//! no opinion. [`run_constraints`] evaluates a list concurrently and folds the
//! votes into one decision.
//!
//! The same combinator serves two granularities:
//! - step-global constraints, over a [`StepConstraintContext`];
//! - per-artifact constraints, over an [`ArtifactConstraintContext`].

use futures::future::BoxFuture;

use crate::status::{ErrorInfo, Status};

pub mod builtin;
pub mod context;
pub mod runner;

pub use builtin::{
    RequireUpstreamPassedInCache, SkipIfArtifactNotSelected, SkipIfArtifactResultInCache,
    SkipIfMissingScript, SkipIfParentStepFailed, SkipIfStepDisabled, SkipIfStepResultInCache,
};
pub use context::{ArtifactConstraintContext, StepConstraintContext};
pub use runner::{combine_constraint_results, run_constraints};

/// A single constraint's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    ShouldRun,
    /// Block the unit of work; the cell ends `aborted` with this status.
    ShouldSkip(Status),
    /// No objection, but not an authoritative pass either.
    IgnoreThisConstraint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintResult {
    pub verdict: Verdict,
    pub notes: Vec<String>,
    pub errors: Vec<ErrorInfo>,
}

impl ConstraintResult {
    fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            notes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn run() -> Self {
        Self::with_verdict(Verdict::ShouldRun)
    }

    pub fn skip(status: Status) -> Self {
        Self::with_verdict(Verdict::ShouldSkip(status))
    }

    pub fn ignore() -> Self {
        Self::with_verdict(Verdict::IgnoreThisConstraint)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.errors.push(error);
        self
    }
}

/// Folded decision of a constraint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(Status),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedConstraintResult {
    pub decision: Decision,
    /// Notes of every constraint, deduplicated, in constraint order.
    pub notes: Vec<String>,
    /// Errors of every constraint, in constraint order.
    pub errors: Vec<ErrorInfo>,
}

impl CombinedConstraintResult {
    pub fn should_run(&self) -> bool {
        self.decision == Decision::Run
    }
}

/// A predicate over a context `C`.
///
/// Implementations must be free of side effects that other constraints could
/// observe: the runner evaluates them concurrently in no particular order.
pub trait Constraint<C>: Send + Sync {
    /// Used in logs and in the error recorded when the check fails.
    fn name(&self) -> &str;

    fn check<'a>(&'a self, ctx: &'a C) -> BoxFuture<'a, anyhow::Result<ConstraintResult>>;
}
