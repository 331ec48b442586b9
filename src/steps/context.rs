// src/steps/context.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::ResultCache;
use crate::dag::{Graph, Node};
use crate::engine::state::FlowState;
use crate::steps::info::StepInfo;
use crate::workspace::Artifact;

/// Read-only access to the latest published flow state.
#[derive(Clone)]
pub struct StateReader {
    rx: watch::Receiver<Arc<FlowState>>,
}

impl StateReader {
    pub(crate) fn new(rx: watch::Receiver<Arc<FlowState>>) -> Self {
        Self { rx }
    }

    /// Snapshot of the state as of the last applied event.
    pub fn get_state(&self) -> Arc<FlowState> {
        self.rx.borrow().clone()
    }
}

impl fmt::Debug for StateReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateReader").finish_non_exhaustive()
    }
}

/// Everything a step author gets when its logic is created.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub flow_id: String,
    pub repo_path: PathBuf,
    pub repo_hash: String,
    pub artifacts: Arc<Graph<Artifact>>,
    pub steps: Arc<Graph<StepInfo>>,
    pub step_index: usize,
    pub cache: ResultCache,
    pub state: StateReader,
}

impl StepContext {
    pub fn current_step(&self) -> &Node<StepInfo> {
        &self.steps.nodes()[self.step_index]
    }

    pub fn step_info(&self) -> &StepInfo {
        &self.current_step().data
    }

    pub fn get_state(&self) -> Arc<FlowState> {
        self.state.get_state()
    }
}
