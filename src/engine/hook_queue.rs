// src/engine/hook_queue.rs

//! Single-concurrency work queue for the once-per-step hooks.
//!
//! Concurrent artifact tasks all ask for `on_before_artifacts`; the queue
//! task serves requests one at a time in arrival order, runs the hook on the
//! first request and replays the recorded outcome to every later one.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::engine::guard::guarded;
use crate::status::ErrorInfo;
use crate::steps::logic::ArtifactHooks;

pub(crate) type HookOutcome = std::result::Result<(), ErrorInfo>;

enum HookRequest {
    Before(oneshot::Sender<HookOutcome>),
    /// Replies `None` when `on_before_artifacts` never ran.
    After(oneshot::Sender<Option<HookOutcome>>),
}

/// Handle to a step's hook queue. The queue task stops once every handle
/// is dropped.
#[derive(Clone)]
pub(crate) struct HookQueue {
    tx: mpsc::UnboundedSender<HookRequest>,
}

impl HookQueue {
    pub(crate) fn spawn(hooks: Arc<dyn ArtifactHooks>, step_name: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(hooks, rx, step_name));
        Self { tx }
    }

    /// Outcome of `on_before_artifacts`, running it if this is the first
    /// request.
    pub(crate) async fn before(&self) -> HookOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HookRequest::Before(reply)).is_err() {
            return Err(ErrorInfo::new("hook queue stopped"));
        }
        rx.await
            .unwrap_or_else(|_| Err(ErrorInfo::new("hook queue stopped")))
    }

    /// Outcome of `on_after_artifacts`, or `None` if it was skipped because
    /// `on_before_artifacts` never ran.
    pub(crate) async fn after(&self) -> Option<HookOutcome> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HookRequest::After(reply)).is_err() {
            return Some(Err(ErrorInfo::new("hook queue stopped")));
        }
        rx.await
            .unwrap_or_else(|_| Some(Err(ErrorInfo::new("hook queue stopped"))))
    }
}

async fn serve(
    hooks: Arc<dyn ArtifactHooks>,
    mut rx: mpsc::UnboundedReceiver<HookRequest>,
    step_name: String,
) {
    let mut before: Option<HookOutcome> = None;
    let mut after: Option<HookOutcome> = None;

    while let Some(request) = rx.recv().await {
        match request {
            HookRequest::Before(reply) => {
                let outcome = if let Some(outcome) = before.clone() {
                    outcome
                } else {
                    debug!(step = %step_name, "running on_before_artifacts");
                    let outcome = run_hook(
                        async { hooks.on_before_artifacts().await },
                        &step_name,
                        "before",
                    )
                    .await;
                    before = Some(outcome.clone());
                    outcome
                };
                let _ = reply.send(outcome);
            }
            HookRequest::After(reply) => {
                if before.is_none() {
                    let _ = reply.send(None);
                    continue;
                }
                let outcome = if let Some(outcome) = after.clone() {
                    outcome
                } else {
                    debug!(step = %step_name, "running on_after_artifacts");
                    let outcome = run_hook(
                        async { hooks.on_after_artifacts().await },
                        &step_name,
                        "after",
                    )
                    .await;
                    after = Some(outcome.clone());
                    outcome
                };
                let _ = reply.send(Some(outcome));
            }
        }
    }
}

async fn run_hook<F>(hook: F, step_name: &str, which: &str) -> HookOutcome
where
    F: Future<Output = anyhow::Result<()>>,
{
    guarded(hook).await.map_err(|err| {
        warn!(step = %step_name, hook = which, error = %format!("{err:#}"), "step hook failed");
        ErrorInfo::new(format!("{which}-artifacts hook: {err:#}"))
    })
}
