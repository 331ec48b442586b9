// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::dag::Graph;
use crate::engine::events::StatusEvent;
use crate::engine::state::{FlowState, Transition};
use crate::errors::{MonoflowError, Result};
use crate::status::StepResult;
use crate::steps::info::StepInfo;
use crate::workspace::Artifact;

/// Sole writer of the flow state.
///
/// Consumes [`StatusEvent`]s in arrival order, applies each to the pure
/// [`FlowState`], records terminal results in the cache and then publishes
/// the new snapshot. Everything else only reads snapshots or sends events.
pub struct FlowRuntime {
    state: FlowState,
    flow_id: String,
    repo_hash: String,
    steps: Arc<Graph<StepInfo>>,
    artifacts: Arc<Graph<Artifact>>,
    cache: ResultCache,
    event_rx: mpsc::UnboundedReceiver<StatusEvent>,
    state_tx: watch::Sender<Arc<FlowState>>,
    observers: broadcast::Sender<StatusEvent>,
}

impl fmt::Debug for FlowRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRuntime")
            .field("flow_id", &self.flow_id)
            .field("repo_hash", &self.repo_hash)
            .finish_non_exhaustive()
    }
}

pub(crate) struct RuntimeParts {
    pub flow_id: String,
    pub repo_hash: String,
    pub steps: Arc<Graph<StepInfo>>,
    pub artifacts: Arc<Graph<Artifact>>,
    pub cache: ResultCache,
}

impl FlowRuntime {
    pub(crate) fn new(
        parts: RuntimeParts,
        initial: FlowState,
        event_rx: mpsc::UnboundedReceiver<StatusEvent>,
        state_tx: watch::Sender<Arc<FlowState>>,
        observers: broadcast::Sender<StatusEvent>,
    ) -> Self {
        Self {
            state: initial,
            flow_id: parts.flow_id,
            repo_hash: parts.repo_hash,
            steps: parts.steps,
            artifacts: parts.artifacts,
            cache: parts.cache,
            event_rx,
            state_tx,
            observers,
        }
    }

    /// Main event loop. Returns the final state once every step aggregate
    /// is terminal.
    pub async fn run(mut self) -> Result<FlowState> {
        info!(flow_id = %self.flow_id, steps = self.steps.len(), "flow runtime started");

        while !self.state.is_complete() {
            let Some(event) = self.event_rx.recv().await else {
                return Err(MonoflowError::InvariantViolation(format!(
                    "flow stalled: event stream closed with unfinished steps {:?}",
                    self.state.unfinished_steps()
                )));
            };

            match self.state.apply(&event)? {
                Transition::Applied => {}
                Transition::Ignored(reason) => {
                    debug!(
                        step = event.step_index,
                        artifact = ?event.artifact_index,
                        reason,
                        "ignoring status event"
                    );
                    continue;
                }
            }

            self.log_event(&event);
            self.write_through(&event).await;

            // No observers is fine.
            let _ = self.observers.send(event);
            self.state_tx.send_replace(Arc::new(self.state.clone()));
        }

        info!(
            flow_id = %self.flow_id,
            status = %self.state.combined_status(),
            "flow runtime finished"
        );
        Ok(self.state)
    }

    fn log_event(&self, event: &StatusEvent) {
        let step = self
            .steps
            .node(event.step_index)
            .map(|n| n.data.display_name.as_str())
            .unwrap_or("?");
        let status = event.result.status().map(|s| s.to_string());

        match event.artifact_index.and_then(|i| self.artifacts.node(i)) {
            Some(artifact) => debug!(
                step = %step,
                artifact = %artifact.data.name(),
                execution = ?event.result.execution_status(),
                status = ?status,
                "cell updated"
            ),
            None => info!(
                step = %step,
                execution = ?event.result.execution_status(),
                status = ?status,
                "step updated"
            ),
        }
    }

    /// Record `done` results. Cache failures are logged, never fatal:
    /// the flow's own outcome does not depend on them.
    async fn write_through(&self, event: &StatusEvent) {
        if !matches!(event.result, StepResult::Done(_)) {
            return;
        }
        let Some(step) = self.steps.node(event.step_index) else {
            return;
        };
        let step_id = &step.data.step_id;

        let written = match event.artifact_index {
            Some(index) => {
                let Some(artifact) = self.artifacts.node(index) else {
                    return;
                };
                self.cache
                    .record_artifact_result(
                        step_id,
                        &artifact.data.package_hash,
                        &self.flow_id,
                        &event.result,
                    )
                    .await
            }
            None => {
                self.cache
                    .record_step_result(&self.repo_hash, step_id, &self.flow_id, &event.result)
                    .await
            }
        };

        if let Err(err) = written {
            warn!(
                step = %step.data.display_name,
                artifact = ?event.artifact_index,
                error = %err,
                "failed to record result in cache"
            );
        }
    }
}
