// src/steps/logic.rs

//! The seam between the engine and step implementations.
//!
//! A step author provides a [`StepFactory`]. At flow start the engine calls
//! it once with the step's [`StepContext`] and gets back a [`StepLogic`]:
//! either a single whole-step function or three per-artifact hooks, plus the
//! step-global and per-artifact constraint lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::constraints::{ArtifactConstraintContext, Constraint, StepConstraintContext};
use crate::dag::Node;
use crate::status::{ErrorInfo, Status};
use crate::steps::context::StepContext;
use crate::workspace::Artifact;

/// What one artifact's execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactOutcome {
    pub status: Status,
    pub notes: Vec<String>,
    pub errors: Vec<ErrorInfo>,
}

impl ArtifactOutcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            notes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn passed() -> Self {
        Self::new(Status::Passed)
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self::new(Status::Failed).with_note(note)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// What a whole-step function produced.
///
/// Every artifact cell gets `status` unless `artifacts` holds a specific
/// outcome for its index.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: Status,
    pub notes: Vec<String>,
    pub errors: Vec<ErrorInfo>,
    pub artifacts: BTreeMap<usize, ArtifactOutcome>,
}

impl StepOutcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            notes: Vec::new(),
            errors: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn passed() -> Self {
        Self::new(Status::Passed)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_artifact(mut self, artifact_index: usize, outcome: ArtifactOutcome) -> Self {
        self.artifacts.insert(artifact_index, outcome);
        self
    }
}

/// Logic that runs once for the whole step.
pub trait WholeStepLogic: Send + Sync {
    fn run(&self) -> BoxFuture<'_, anyhow::Result<StepOutcome>>;
}

/// Per-artifact hooks.
///
/// `on_before_artifacts` runs once before the first artifact that passes its
/// constraints; `on_after_artifacts` runs once after the last artifact is
/// terminal, and only if `on_before_artifacts` ran.
pub trait ArtifactHooks: Send + Sync {
    fn on_before_artifacts(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn on_artifact<'a>(
        &'a self,
        artifact: &'a Node<Artifact>,
    ) -> BoxFuture<'a, anyhow::Result<ArtifactOutcome>>;

    fn on_after_artifacts(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone)]
pub enum StepRun {
    WholeStep(Arc<dyn WholeStepLogic>),
    PerArtifact(Arc<dyn ArtifactHooks>),
}

/// A step's runnable unit plus the constraints gating it.
pub struct StepLogic {
    pub step_constraints: Vec<Arc<dyn Constraint<StepConstraintContext>>>,
    /// Evaluated per artifact in both modes. A whole step runs once for the
    /// artifacts that pass and never if none do.
    pub artifact_constraints: Vec<Arc<dyn Constraint<ArtifactConstraintContext>>>,
    pub run: StepRun,
    /// Upper bound on concurrent `on_artifact` calls; `None` is unbounded.
    pub max_concurrency: Option<usize>,
}

impl StepLogic {
    pub fn whole_step(logic: Arc<dyn WholeStepLogic>) -> Self {
        Self::with_run(StepRun::WholeStep(logic))
    }

    pub fn per_artifact(hooks: Arc<dyn ArtifactHooks>) -> Self {
        Self::with_run(StepRun::PerArtifact(hooks))
    }

    fn with_run(run: StepRun) -> Self {
        Self {
            step_constraints: Vec::new(),
            artifact_constraints: Vec::new(),
            run,
            max_concurrency: None,
        }
    }

    pub fn step_constraint(mut self, c: Arc<dyn Constraint<StepConstraintContext>>) -> Self {
        self.step_constraints.push(c);
        self
    }

    pub fn artifact_constraint(
        mut self,
        c: Arc<dyn Constraint<ArtifactConstraintContext>>,
    ) -> Self {
        self.artifact_constraints.push(c);
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }
}

/// The step author's entry point.
pub trait StepFactory: Send + Sync {
    fn create(&self, ctx: StepContext) -> anyhow::Result<StepLogic>;
}

impl<F> StepFactory for F
where
    F: Fn(StepContext) -> anyhow::Result<StepLogic> + Send + Sync,
{
    fn create(&self, ctx: StepContext) -> anyhow::Result<StepLogic> {
        self(ctx)
    }
}
