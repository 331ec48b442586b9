// src/constraints/context.rs

use crate::dag::Node;
use crate::steps::context::StepContext;
use crate::workspace::Artifact;

/// Context of a step-global constraint.
#[derive(Debug, Clone)]
pub struct StepConstraintContext {
    pub step: StepContext,
}

/// Context of a per-artifact constraint: the step plus the bound artifact.
#[derive(Debug, Clone)]
pub struct ArtifactConstraintContext {
    pub step: StepContext,
    pub artifact_index: usize,
}

impl ArtifactConstraintContext {
    pub fn artifact(&self) -> &Node<Artifact> {
        &self.step.artifacts.nodes()[self.artifact_index]
    }
}
