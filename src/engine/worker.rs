// src/engine/worker.rs

//! One task per step.
//!
//! A worker watches state snapshots and only starts an artifact once both
//! ordering rules hold for it:
//! - every recursive parent step has a terminal cell for that artifact;
//! - every parent artifact has a terminal cell in this step.
//!
//! It reports progress exclusively by sending [`StatusEvent`]s; the runtime
//! is the only writer of the state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use futures::future::join_all;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::constraints::{
    ArtifactConstraintContext, CombinedConstraintResult, Constraint, Decision,
    StepConstraintContext, run_constraints,
};
use crate::engine::events::StatusEvent;
use crate::engine::guard::guarded;
use crate::engine::hook_queue::HookQueue;
use crate::engine::state::{FlowState, aggregate_step_result};
use crate::errors::{MonoflowError, Result};
use crate::status::{
    AbortedResult, DoneResult, ErrorInfo, Status, StepResult, push_unique_notes,
};
use crate::steps::context::StepContext;
use crate::steps::logic::{ArtifactHooks, StepLogic, StepOutcome, StepRun, WholeStepLogic};

type ArtifactConstraints = Arc<Vec<Arc<dyn Constraint<ArtifactConstraintContext>>>>;

pub(crate) struct StepWorker {
    step_index: usize,
    step_name: String,
    ctx: StepContext,
    logic: StepLogic,
    /// Recursive parent steps.
    ancestors: BTreeSet<usize>,
    events: Emitter,
    state_rx: watch::Receiver<Arc<FlowState>>,
}

/// Sends events for one step.
#[derive(Clone)]
struct Emitter {
    step_index: usize,
    step_name: String,
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl Emitter {
    fn send(&self, event: StatusEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| {
            MonoflowError::Other(anyhow!(
                "flow runtime stopped before step '{}' finished",
                self.step_name
            ))
        })
    }

    fn cell(&self, artifact_index: usize, result: StepResult) -> Result<()> {
        self.send(StatusEvent::cell(self.step_index, artifact_index, result))
    }

    fn step(&self, result: StepResult) -> Result<()> {
        self.send(StatusEvent::step(self.step_index, result))
    }
}

impl StepWorker {
    pub(crate) fn new(
        ctx: StepContext,
        logic: StepLogic,
        ancestors: BTreeSet<usize>,
        tx: mpsc::UnboundedSender<StatusEvent>,
        state_rx: watch::Receiver<Arc<FlowState>>,
    ) -> Self {
        let step_index = ctx.step_index;
        let step_name = ctx.step_info().display_name.clone();
        Self {
            step_index,
            step_name: step_name.clone(),
            ctx,
            logic,
            ancestors,
            events: Emitter {
                step_index,
                step_name,
                tx,
            },
            state_rx,
        }
    }

    pub(crate) async fn run(self) -> Result<()> {
        if self.ctx.artifacts.is_empty() {
            info!(step = %self.step_name, "no artifacts; skipping step");
            return self.events.step(StepResult::aborted(
                Status::SkippedAsPassed,
                vec!["no artifacts to process".to_string()],
                Vec::new(),
            ));
        }

        match self.logic.run.clone() {
            StepRun::WholeStep(logic) => self.run_whole_step(logic).await,
            StepRun::PerArtifact(hooks) => self.run_per_artifact(hooks).await,
        }
    }

    async fn run_whole_step(mut self, logic: Arc<dyn WholeStepLogic>) -> Result<()> {
        let total = self.ctx.artifacts.len();
        let ancestors = &self.ancestors;
        self.state_rx
            .wait_for(|state| (0..total).all(|a| parent_steps_done(state, ancestors, a)))
            .await
            .map_err(|_| runtime_gone(&self.step_name))?;

        let started = Instant::now();
        let Some(gate) = self.step_gate().await? else {
            return Ok(());
        };

        // Artifact constraints still decide which cells the step covers.
        let constraints = std::mem::take(&mut self.logic.artifact_constraints);
        let verdicts = join_all((0..total).map(|artifact_index| {
            let ctx = ArtifactConstraintContext {
                step: self.ctx.clone(),
                artifact_index,
            };
            let constraints = &constraints;
            async move { (artifact_index, run_constraints(constraints, &ctx).await) }
        }))
        .await;

        let mut selected = Vec::with_capacity(total);
        for (artifact_index, combined) in verdicts {
            match combined.decision {
                Decision::Skip(status) => {
                    debug!(
                        step = %self.step_name,
                        artifact = %self.ctx.artifacts.nodes()[artifact_index].data.name(),
                        %status,
                        "skipping artifact"
                    );
                    self.events.cell(
                        artifact_index,
                        StepResult::Aborted(AbortedResult {
                            status,
                            duration_ms: None,
                            notes: combined.notes,
                            errors: combined.errors,
                        }),
                    )?;
                }
                Decision::Run => selected.push((artifact_index, combined)),
            }
        }

        if selected.is_empty() {
            info!(step = %self.step_name, "every artifact skipped; not running step");
            return self.finish(started, gate.notes, gate.errors).await;
        }

        for (artifact_index, _) in &selected {
            self.events.cell(*artifact_index, StepResult::Running)?;
        }

        info!(step = %self.step_name, artifacts = selected.len(), "running step");
        let outcome = guarded(async { logic.run().await })
            .await
            .unwrap_or_else(|err| {
                warn!(step = %self.step_name, error = %format!("{err:#}"), "step failed");
                let mut outcome = StepOutcome::new(Status::Failed);
                outcome.errors.push(ErrorInfo::from_anyhow(&err));
                outcome
            });
        let duration_ms = elapsed_ms(started);

        for (artifact_index, combined) in selected {
            let mut notes = combined.notes;
            let mut errors = combined.errors;
            let status = match outcome.artifacts.get(&artifact_index) {
                Some(specific) => {
                    push_unique_notes(&mut notes, specific.notes.clone());
                    errors.extend(specific.errors.iter().cloned());
                    specific.status
                }
                None => outcome.status,
            };
            self.events.cell(
                artifact_index,
                StepResult::Done(DoneResult {
                    status,
                    duration_ms,
                    notes,
                    errors,
                }),
            )?;
        }

        let mut notes = gate.notes;
        push_unique_notes(&mut notes, outcome.notes);
        let mut errors = gate.errors;
        errors.extend(outcome.errors);
        self.finish(started, notes, errors).await
    }

    async fn run_per_artifact(mut self, hooks: Arc<dyn ArtifactHooks>) -> Result<()> {
        let total = self.ctx.artifacts.len();
        let started = Instant::now();
        let mut launched = vec![false; total];
        let mut gate: Option<CombinedConstraintResult> = None;
        let mut tasks: JoinSet<()> = JoinSet::new();

        let limiter = self.logic.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let constraints: ArtifactConstraints =
            Arc::new(std::mem::take(&mut self.logic.artifact_constraints));
        let hook_queue = HookQueue::spawn(hooks.clone(), self.step_name.clone());

        loop {
            let state = self.state_rx.borrow_and_update().clone();
            let ready: Vec<usize> = (0..total)
                .filter(|a| !launched[*a])
                .filter(|a| parent_steps_done(&state, &self.ancestors, *a))
                .filter(|a| parent_artifacts_done(&state, &self.ctx, *a))
                .collect();

            if !ready.is_empty() && gate.is_none() {
                match self.step_gate().await? {
                    Some(passed) => gate = Some(passed),
                    None => return Ok(()),
                }
            }

            for artifact_index in ready {
                launched[artifact_index] = true;
                debug!(
                    step = %self.step_name,
                    artifact = %self.ctx.artifacts.nodes()[artifact_index].data.name(),
                    "artifact ready"
                );
                tasks.spawn(process_artifact(ArtifactTask {
                    ctx: ArtifactConstraintContext {
                        step: self.ctx.clone(),
                        artifact_index,
                    },
                    constraints: constraints.clone(),
                    hooks: hooks.clone(),
                    hook_queue: hook_queue.clone(),
                    limiter: limiter.clone(),
                    events: self.events.clone(),
                }));
            }

            if launched.iter().all(|l| *l) {
                break;
            }

            tokio::select! {
                changed = self.state_rx.changed() => {
                    changed.map_err(|_| runtime_gone(&self.step_name))?;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    joined.map_err(|e| task_crashed(&self.step_name, e))?;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| task_crashed(&self.step_name, e))?;
        }

        let step_index = self.step_index;
        self.state_rx
            .wait_for(|state| state.step_cells_terminal(step_index))
            .await
            .map_err(|_| runtime_gone(&self.step_name))?;

        let gate = gate.unwrap_or_else(|| CombinedConstraintResult {
            decision: Decision::Run,
            notes: Vec::new(),
            errors: Vec::new(),
        });
        let mut errors = gate.errors;
        if let Some(Err(err)) = hook_queue.after().await {
            errors.push(err);
        }
        drop(hook_queue);

        self.finish(started, gate.notes, errors).await
    }

    /// Evaluate step constraints. On skip, abort every cell and the step and
    /// return `None`; otherwise mark the step running.
    async fn step_gate(&self) -> Result<Option<CombinedConstraintResult>> {
        let ctx = StepConstraintContext {
            step: self.ctx.clone(),
        };
        let combined = run_constraints(&self.logic.step_constraints, &ctx).await;

        if let Decision::Skip(status) = combined.decision {
            info!(step = %self.step_name, %status, notes = ?combined.notes, "skipping step");
            let total = self.ctx.artifacts.len();
            let mut cells = Vec::with_capacity(total);
            for artifact_index in 0..total {
                let result = StepResult::Aborted(AbortedResult {
                    status,
                    duration_ms: None,
                    notes: combined.notes.clone(),
                    errors: combined.errors.clone(),
                });
                self.events.cell(artifact_index, result.clone())?;
                cells.push(result);
            }
            let aggregate = aggregate_step_result(&cells, 0, combined.notes, combined.errors)?;
            self.events.step(aggregate)?;
            return Ok(None);
        }

        self.events.step(StepResult::Running)?;
        Ok(Some(combined))
    }

    /// Emit the step aggregate once every cell is terminal.
    async fn finish(
        mut self,
        started: Instant,
        notes: Vec<String>,
        errors: Vec<ErrorInfo>,
    ) -> Result<()> {
        let step_index = self.step_index;
        let state = self
            .state_rx
            .wait_for(|state| state.step_cells_terminal(step_index))
            .await
            .map_err(|_| runtime_gone(&self.step_name))?
            .clone();

        let cells = state
            .by_step()
            .get(step_index)
            .map(|row| row.artifacts_result.clone())
            .unwrap_or_default();
        let aggregate = aggregate_step_result(&cells, elapsed_ms(started), notes, errors)?;
        info!(
            step = %self.step_name,
            status = ?aggregate.status(),
            "step finished"
        );
        self.events.step(aggregate)
    }

}

struct ArtifactTask {
    ctx: ArtifactConstraintContext,
    constraints: ArtifactConstraints,
    hooks: Arc<dyn ArtifactHooks>,
    hook_queue: HookQueue,
    limiter: Option<Arc<Semaphore>>,
    events: Emitter,
}

/// Constraints, then `on_before_artifacts` (once per step), then
/// `on_artifact`. Every failure ends up in the cell.
async fn process_artifact(task: ArtifactTask) {
    let artifact_index = task.ctx.artifact_index;
    let artifact_name = task.ctx.artifact().data.name().to_string();
    let step_name = task.events.step_name.clone();

    let combined = run_constraints(&task.constraints, &task.ctx).await;
    let result = if let Decision::Skip(status) = combined.decision {
        debug!(step = %step_name, artifact = %artifact_name, %status, "skipping artifact");
        StepResult::Aborted(AbortedResult {
            status,
            duration_ms: None,
            notes: combined.notes,
            errors: combined.errors,
        })
    } else {
        let _permit = match &task.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };
        if task.events.cell(artifact_index, StepResult::Running).is_err() {
            return;
        }
        run_artifact(&task, combined, &step_name, &artifact_name).await
    };

    if let Err(err) = task.events.cell(artifact_index, result) {
        warn!(step = %step_name, artifact = %artifact_name, error = %err, "dropped artifact result");
    }
}

async fn run_artifact(
    task: &ArtifactTask,
    combined: CombinedConstraintResult,
    step_name: &str,
    artifact_name: &str,
) -> StepResult {
    let started = Instant::now();
    let mut notes = combined.notes;
    let mut errors = combined.errors;

    if let Err(err) = task.hook_queue.before().await {
        errors.push(err);
        notes.push("before-artifacts hook failed".to_string());
        return StepResult::Aborted(AbortedResult {
            status: Status::SkippedAsFailed,
            duration_ms: Some(elapsed_ms(started)),
            notes,
            errors,
        });
    }

    debug!(step = %step_name, artifact = %artifact_name, "running artifact");
    let node = task.ctx.artifact();
    let status = match guarded(async { task.hooks.on_artifact(node).await }).await {
        Ok(outcome) => {
            push_unique_notes(&mut notes, outcome.notes);
            errors.extend(outcome.errors);
            outcome.status
        }
        Err(err) => {
            warn!(
                step = %step_name,
                artifact = %artifact_name,
                error = %format!("{err:#}"),
                "artifact failed"
            );
            errors.push(ErrorInfo::from_anyhow(&err));
            Status::Failed
        }
    };

    StepResult::Done(DoneResult {
        status,
        duration_ms: elapsed_ms(started),
        notes,
        errors,
    })
}

fn parent_steps_done(state: &FlowState, ancestors: &BTreeSet<usize>, artifact: usize) -> bool {
    ancestors
        .iter()
        .all(|step| state.cell(*step, artifact).is_some_and(StepResult::is_terminal))
}

fn parent_artifacts_done(state: &FlowState, ctx: &StepContext, artifact: usize) -> bool {
    ctx.artifacts.nodes()[artifact]
        .parents_indexes
        .iter()
        .all(|parent| {
            state
                .cell(ctx.step_index, *parent)
                .is_some_and(StepResult::is_terminal)
        })
}

fn runtime_gone(step_name: &str) -> MonoflowError {
    MonoflowError::Other(anyhow!(
        "flow state closed before step '{step_name}' finished"
    ))
}

fn task_crashed(step_name: &str, err: tokio::task::JoinError) -> MonoflowError {
    MonoflowError::Other(anyhow!("artifact task of step '{step_name}' crashed: {err}"))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
