// src/constraints/builtin.rs

//! Constraint families shipped with the crate.
//!
//! The command step wires these from its configuration; custom steps can
//! mix them with their own.

use futures::future::BoxFuture;

use crate::cache::CachedResult;
use crate::constraints::{
    ArtifactConstraintContext, Constraint, ConstraintResult, StepConstraintContext,
};
use crate::status::Status;
use crate::workspace::PathMatcher;
use crate::workspace::path_utils::unix_str;

/// Skips the whole step when it is turned off in configuration.
#[derive(Debug, Clone)]
pub struct SkipIfStepDisabled {
    pub enabled: bool,
}

impl Constraint<StepConstraintContext> for SkipIfStepDisabled {
    fn name(&self) -> &str {
        "skip-if-step-disabled"
    }

    fn check<'a>(
        &'a self,
        _ctx: &'a StepConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            if self.enabled {
                Ok(ConstraintResult::run())
            } else {
                Ok(ConstraintResult::skip(Status::SkippedAsPassed).with_note("step is disabled"))
            }
        })
    }
}

/// Skips artifacts whose `package.json` lacks the script the step runs.
#[derive(Debug, Clone)]
pub struct SkipIfMissingScript {
    pub script: String,
}

impl Constraint<ArtifactConstraintContext> for SkipIfMissingScript {
    fn name(&self) -> &str {
        "skip-if-missing-script"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ArtifactConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let artifact = &ctx.artifact().data;
            if artifact.package_json.has_script(&self.script) {
                Ok(ConstraintResult::run())
            } else {
                Ok(ConstraintResult::skip(Status::SkippedAsPassed).with_note(format!(
                    "package has no '{}' script",
                    self.script
                )))
            }
        })
    }
}

/// Skips artifacts outside the step's include/exclude globs.
#[derive(Debug, Clone)]
pub struct SkipIfArtifactNotSelected {
    pub matcher: PathMatcher,
}

impl Constraint<ArtifactConstraintContext> for SkipIfArtifactNotSelected {
    fn name(&self) -> &str {
        "skip-if-artifact-not-selected"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ArtifactConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let rel = unix_str(&ctx.artifact().data.relative_package_path);
            if self.matcher.matches(&rel) {
                Ok(ConstraintResult::run())
            } else {
                Ok(ConstraintResult::skip(Status::SkippedAsPassed)
                    .with_note("artifact is not selected for this step"))
            }
        })
    }
}

/// Skips an artifact when this step already has a recorded result for the
/// artifact's current hash.
///
/// A recorded pass skips as passed. A recorded failure either skips as
/// failed or, with `rerun_failures`, defers to the other constraints.
#[derive(Debug, Clone)]
pub struct SkipIfArtifactResultInCache {
    pub rerun_failures: bool,
}

impl Constraint<ArtifactConstraintContext> for SkipIfArtifactResultInCache {
    fn name(&self) -> &str {
        "skip-if-artifact-result-in-cache"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ArtifactConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let step_id = &ctx.step.step_info().step_id;
            let hash = &ctx.artifact().data.package_hash;
            let cached = ctx.step.cache.artifact_result(step_id, hash).await?;
            Ok(verdict_from_cached(cached, self.rerun_failures))
        })
    }
}

/// Step-level counterpart of [`SkipIfArtifactResultInCache`], keyed by the
/// repo hash. Meant for steps that run once at the repo root.
#[derive(Debug, Clone)]
pub struct SkipIfStepResultInCache {
    pub rerun_failures: bool,
}

impl Constraint<StepConstraintContext> for SkipIfStepResultInCache {
    fn name(&self) -> &str {
        "skip-if-step-result-in-cache"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a StepConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let step_id = &ctx.step.step_info().step_id;
            let cached = ctx.step.cache.step_result(&ctx.step.repo_hash, step_id).await?;
            Ok(verdict_from_cached(cached, self.rerun_failures))
        })
    }
}

fn verdict_from_cached(
    cached: Option<CachedResult>,
    rerun_failures: bool,
) -> ConstraintResult {
    let Some(cached) = cached else {
        return ConstraintResult::ignore();
    };
    match cached.result.status() {
        Some(status) if !status.is_failure() => ConstraintResult::skip(Status::SkippedAsPassed)
            .with_note(format!(
                "step already ran and passed on this content in flow {}",
                cached.flow_id
            )),
        Some(_) if rerun_failures => ConstraintResult::ignore().with_note(format!(
            "step failed on this content in flow {}; running again",
            cached.flow_id
        )),
        Some(_) => ConstraintResult::skip(Status::SkippedAsFailed).with_note(format!(
            "step already ran and failed on this content in flow {}",
            cached.flow_id
        )),
        None => ConstraintResult::ignore(),
    }
}

/// Requires another step to have passed on this artifact's current hash.
#[derive(Debug, Clone)]
pub struct RequireUpstreamPassedInCache {
    pub upstream_step_id: String,
    pub upstream_display_name: String,
}

impl Constraint<ArtifactConstraintContext> for RequireUpstreamPassedInCache {
    fn name(&self) -> &str {
        "require-upstream-passed-in-cache"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ArtifactConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let hash = &ctx.artifact().data.package_hash;
            let cached = ctx
                .step
                .cache
                .artifact_result(&self.upstream_step_id, hash)
                .await?;
            let upstream = &self.upstream_display_name;

            let result = match cached.as_ref().and_then(|c| c.result.status()) {
                None => ConstraintResult::skip(Status::SkippedAsFailed).with_note(format!(
                    "'{upstream}' has no recorded result for this content"
                )),
                Some(status) if status.is_failure() => {
                    ConstraintResult::skip(Status::SkippedAsFailed)
                        .with_note(format!("'{upstream}' failed on this content"))
                }
                Some(_) => ConstraintResult::run(),
            };
            Ok(result)
        })
    }
}

/// Skips an artifact when a parent step ended in failure on it during the
/// current flow.
#[derive(Debug, Clone, Default)]
pub struct SkipIfParentStepFailed;

impl Constraint<ArtifactConstraintContext> for SkipIfParentStepFailed {
    fn name(&self) -> &str {
        "skip-if-parent-step-failed"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ArtifactConstraintContext,
    ) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            let state = ctx.step.get_state();
            let mut result = ConstraintResult::run();
            for parent in &ctx.step.current_step().parents_indexes {
                let failed = state
                    .cell(*parent, ctx.artifact_index)
                    .and_then(|cell| cell.status())
                    .is_some_and(Status::is_failure);
                if failed {
                    let parent_name = &ctx.step.steps.nodes()[*parent].data.display_name;
                    result = ConstraintResult::skip(Status::SkippedAsFailed)
                        .with_note(format!("parent step '{parent_name}' failed on this artifact"));
                    break;
                }
            }
            Ok(result)
        })
    }
}
