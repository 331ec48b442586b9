// src/engine/flow.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::dag::Graph;
use crate::engine::events::StatusEvent;
use crate::engine::runtime::{FlowRuntime, RuntimeParts};
use crate::engine::state::FlowState;
use crate::engine::worker::StepWorker;
use crate::errors::{MonoflowError, Result};
use crate::hash::HashedRepo;
use crate::report::FlowReport;
use crate::steps::context::{StateReader, StepContext};
use crate::steps::info::StepInfo;
use crate::steps::logic::StepFactory;
use crate::workspace::Artifact;

const OBSERVER_BUFFER: usize = 1024;

/// One end-to-end run of the step graph against a hashed repo.
pub struct Flow {
    flow_id: String,
    repo_path: PathBuf,
    repo_hash: String,
    artifacts: Arc<Graph<Artifact>>,
    steps: Arc<Graph<StepInfo>>,
    factories: Vec<Arc<dyn StepFactory>>,
    cache: ResultCache,
    observers: broadcast::Sender<StatusEvent>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("flow_id", &self.flow_id)
            .field("repo_path", &self.repo_path)
            .field("repo_hash", &self.repo_hash)
            .field("steps", &self.steps.len())
            .field("artifacts", &self.artifacts.len())
            .finish_non_exhaustive()
    }
}

impl Flow {
    /// `factories[i]` supplies the logic of step `i`.
    pub fn new(
        hashed: HashedRepo,
        repo_path: impl Into<PathBuf>,
        steps: Graph<StepInfo>,
        factories: Vec<Arc<dyn StepFactory>>,
        cache: ResultCache,
    ) -> Result<Self> {
        if factories.len() != steps.len() {
            return Err(MonoflowError::ConfigError(format!(
                "{} steps but {} step factories",
                steps.len(),
                factories.len()
            )));
        }

        let (observers, _) = broadcast::channel(OBSERVER_BUFFER);
        Ok(Self {
            flow_id: Uuid::new_v4().to_string(),
            repo_path: repo_path.into(),
            repo_hash: hashed.repo_hash,
            artifacts: Arc::new(hashed.artifacts),
            steps: Arc::new(steps),
            factories,
            cache,
            observers,
        })
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = flow_id.into();
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Every applied status event, in application order.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.observers.subscribe()
    }

    /// Drive every step to a terminal aggregate.
    ///
    /// Factory failures and invariant violations are fatal. Failures inside
    /// step logic only ever land in cell results.
    pub async fn run(self) -> Result<FlowReport> {
        info!(
            flow_id = %self.flow_id,
            repo_hash = %self.repo_hash,
            steps = self.steps.len(),
            artifacts = self.artifacts.len(),
            "starting flow"
        );

        let initial = FlowState::new(&self.steps, &self.artifacts);
        let (state_tx, state_rx) = watch::channel(Arc::new(initial.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let ancestors = self.steps.ancestors();
        let mut workers = Vec::with_capacity(self.steps.len());
        for (step_index, factory) in self.factories.iter().enumerate() {
            let ctx = StepContext {
                flow_id: self.flow_id.clone(),
                repo_path: self.repo_path.clone(),
                repo_hash: self.repo_hash.clone(),
                artifacts: self.artifacts.clone(),
                steps: self.steps.clone(),
                step_index,
                cache: self.cache.clone(),
                state: StateReader::new(state_rx.clone()),
            };
            let name = ctx.step_info().display_name.clone();
            let logic = factory
                .create(ctx.clone())
                .map_err(|e| MonoflowError::Other(e.context(format!("creating step '{name}'"))))?;
            workers.push(StepWorker::new(
                ctx,
                logic,
                ancestors[step_index].clone(),
                event_tx.clone(),
                state_rx.clone(),
            ));
        }
        // Workers hold the only senders; the stream closes once they are gone.
        drop(event_tx);
        drop(state_rx);

        let runtime = FlowRuntime::new(
            RuntimeParts {
                flow_id: self.flow_id.clone(),
                repo_hash: self.repo_hash.clone(),
                steps: self.steps.clone(),
                artifacts: self.artifacts.clone(),
                cache: self.cache.clone(),
            },
            initial,
            event_rx,
            state_tx,
            self.observers.clone(),
        );

        let mut worker_set = JoinSet::new();
        for worker in workers {
            worker_set.spawn(worker.run());
        }

        let runtime_fut = runtime.run();
        tokio::pin!(runtime_fut);

        let outcome = loop {
            tokio::select! {
                result = &mut runtime_fut => break result,
                Some(joined) = worker_set.join_next() => {
                    if let Err(err) = worker_outcome(joined) {
                        break Err(err);
                    }
                }
            }
        };

        let state = match outcome {
            Ok(state) => state,
            Err(err) => {
                error!(flow_id = %self.flow_id, error = %err, "flow aborted");
                worker_set.abort_all();
                return Err(err);
            }
        };

        while let Some(joined) = worker_set.join_next().await {
            worker_outcome(joined)?;
        }

        info!(
            flow_id = %self.flow_id,
            status = %state.combined_status(),
            "flow finished"
        );
        Ok(FlowReport {
            flow_id: self.flow_id,
            repo_hash: self.repo_hash,
            state,
        })
    }
}

fn worker_outcome(
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(MonoflowError::Other(anyhow!("step worker crashed: {err}"))),
    }
}
