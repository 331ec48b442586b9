// src/constraints/runner.rs

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::constraints::{
    CombinedConstraintResult, Constraint, ConstraintResult, Decision, Verdict,
};
use crate::engine::guard::guarded;
use crate::status::{ErrorInfo, Status, combine_statuses, push_unique_notes};

/// Evaluate every constraint concurrently and fold the votes.
///
/// A constraint that errors or panics votes `ShouldSkip(SkippedAsFailed)`
/// with the failure recorded; it never fails the call.
pub async fn run_constraints<C>(
    constraints: &[Arc<dyn Constraint<C>>],
    ctx: &C,
) -> CombinedConstraintResult
where
    C: Send + Sync,
{
    let checks = constraints.iter().map(|constraint| async move {
        let name = constraint.name();
        match guarded(async { constraint.check(ctx).await }).await {
            Ok(result) => {
                debug!(constraint = %name, verdict = ?result.verdict, "constraint evaluated");
                result
            }
            Err(err) => {
                warn!(constraint = %name, error = %format!("{err:#}"), "constraint failed");
                ConstraintResult::skip(Status::SkippedAsFailed)
                    .with_note(format!("constraint '{name}' failed"))
                    .with_error(ErrorInfo::new(format!("constraint '{name}': {err:#}")))
            }
        }
    });

    combine_constraint_results(join_all(checks).await)
}

/// Fold individual votes into one decision.
///
/// Runs iff every vote is `ShouldRun` or `IgnoreThisConstraint`. On skip the
/// status combines only the statuses of the skipping votes.
pub fn combine_constraint_results<I>(results: I) -> CombinedConstraintResult
where
    I: IntoIterator<Item = ConstraintResult>,
{
    let mut skip_statuses = Vec::new();
    let mut notes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        if let Verdict::ShouldSkip(status) = result.verdict {
            skip_statuses.push(status);
        }
        push_unique_notes(&mut notes, result.notes);
        errors.extend(result.errors);
    }

    let decision = if skip_statuses.is_empty() {
        Decision::Run
    } else {
        Decision::Skip(combine_statuses(skip_statuses))
    };

    CombinedConstraintResult {
        decision,
        notes,
        errors,
    }
}
