use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use monoflow::constraints::{
    Constraint, ConstraintResult, SkipIfArtifactResultInCache, SkipIfParentStepFailed,
};
use monoflow::dag::Node;
use monoflow::status::Status;
use monoflow::steps::{
    ArtifactHooks, ArtifactOutcome, StepContext, StepFactory, StepLogic, StepOutcome,
    WholeStepLogic,
};
use monoflow::workspace::Artifact;

/// One observed hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Before { step: String },
    ArtifactStart { step: String, artifact: String },
    ArtifactEnd { step: String, artifact: String },
    After { step: String },
    WholeStep { step: String },
}

/// Shared, ordered log of hook invocations across steps.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    /// Artifacts `on_artifact` started for, in order, for one step.
    pub fn artifacts_run(&self, step: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ArtifactStart { step: s, artifact } if s == step => Some(artifact),
                _ => None,
            })
            .collect()
    }
}

/// How a recording hook behaves for an artifact.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Return(Status),
    Error(String),
    Panic(String),
}

/// Per-artifact hooks that log every call.
pub struct RecordingHooks {
    step: String,
    log: CallLog,
    delay: Duration,
    default: Behaviour,
    overrides: Vec<(String, Behaviour)>,
}

impl ArtifactHooks for RecordingHooks {
    fn on_before_artifacts(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(Call::Before {
                step: self.step.clone(),
            });
            // Give concurrent artifacts a chance to race for the hook.
            tokio::task::yield_now().await;
            Ok(())
        })
    }

    fn on_artifact<'a>(
        &'a self,
        artifact: &'a Node<Artifact>,
    ) -> BoxFuture<'a, anyhow::Result<ArtifactOutcome>> {
        Box::pin(async move {
            let name = artifact.data.name().to_string();
            self.log.push(Call::ArtifactStart {
                step: self.step.clone(),
                artifact: name.clone(),
            });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.push(Call::ArtifactEnd {
                step: self.step.clone(),
                artifact: name.clone(),
            });

            let behaviour = self
                .overrides
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, b)| b.clone())
                .unwrap_or_else(|| self.default.clone());
            match behaviour {
                Behaviour::Return(status) => Ok(ArtifactOutcome::new(status)),
                Behaviour::Error(msg) => Err(anyhow::anyhow!(msg)),
                Behaviour::Panic(msg) => panic!("{msg}"),
            }
        })
    }

    fn on_after_artifacts(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(Call::After {
                step: self.step.clone(),
            });
            Ok(())
        })
    }
}

/// Step factory producing [`RecordingHooks`].
#[derive(Clone)]
pub struct RecordingStep {
    log: CallLog,
    delay: Duration,
    default: Behaviour,
    overrides: Vec<(String, Behaviour)>,
    skip_if_cached: bool,
    skip_if_parent_failed: bool,
    max_concurrency: Option<usize>,
}

impl RecordingStep {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            delay: Duration::ZERO,
            default: Behaviour::Return(Status::Passed),
            overrides: Vec::new(),
            skip_if_cached: false,
            skip_if_parent_failed: false,
            max_concurrency: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn behaviour(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn behaviour_for(mut self, artifact: &str, behaviour: Behaviour) -> Self {
        self.overrides.push((artifact.to_string(), behaviour));
        self
    }

    pub fn skip_if_cached(mut self) -> Self {
        self.skip_if_cached = true;
        self
    }

    pub fn skip_if_parent_failed(mut self) -> Self {
        self.skip_if_parent_failed = true;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn boxed(self) -> Arc<dyn StepFactory> {
        Arc::new(self)
    }
}

impl StepFactory for RecordingStep {
    fn create(&self, ctx: StepContext) -> anyhow::Result<StepLogic> {
        let mut logic = StepLogic::per_artifact(Arc::new(RecordingHooks {
            step: ctx.step_info().step_name.clone(),
            log: self.log.clone(),
            delay: self.delay,
            default: self.default.clone(),
            overrides: self.overrides.clone(),
        }));
        if self.skip_if_cached {
            logic = logic.artifact_constraint(Arc::new(SkipIfArtifactResultInCache {
                rerun_failures: true,
            }));
        }
        if self.skip_if_parent_failed {
            logic = logic.artifact_constraint(Arc::new(SkipIfParentStepFailed));
        }
        if let Some(limit) = self.max_concurrency {
            logic = logic.max_concurrency(limit);
        }
        Ok(logic)
    }
}

/// Whole-step logic that logs and returns a fixed outcome.
pub struct RecordingWholeStep {
    step: String,
    log: CallLog,
    outcome: StepOutcome,
}

impl WholeStepLogic for RecordingWholeStep {
    fn run(&self) -> BoxFuture<'_, anyhow::Result<StepOutcome>> {
        Box::pin(async move {
            self.log.push(Call::WholeStep {
                step: self.step.clone(),
            });
            Ok(self.outcome.clone())
        })
    }
}

/// Factory for [`RecordingWholeStep`].
pub fn whole_step(log: &CallLog, outcome: StepOutcome) -> Arc<dyn StepFactory> {
    let log = log.clone();
    Arc::new(move |ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(StepLogic::whole_step(Arc::new(RecordingWholeStep {
            step: ctx.step_info().step_name.clone(),
            log: log.clone(),
            outcome: outcome.clone(),
        })))
    })
}

/// Constraint with a scripted response, usable at any granularity.
pub enum ScriptedConstraint {
    Returns(ConstraintResult),
    Errors(String),
    Panics(String),
}

impl<C: Send + Sync> Constraint<C> for ScriptedConstraint {
    fn name(&self) -> &str {
        "scripted"
    }

    fn check<'a>(&'a self, _ctx: &'a C) -> BoxFuture<'a, anyhow::Result<ConstraintResult>> {
        Box::pin(async move {
            match self {
                ScriptedConstraint::Returns(result) => Ok(result.clone()),
                ScriptedConstraint::Errors(msg) => Err(anyhow::anyhow!(msg.clone())),
                ScriptedConstraint::Panics(msg) => panic!("{msg}"),
            }
        })
    }
}
