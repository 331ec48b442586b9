// src/steps/command.rs

//! Shell command step built from `[step.<key>]` configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use anyhow::Context;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{ConfigFile, RunOnConfig, StepConfig};
use crate::constraints::{
    RequireUpstreamPassedInCache, SkipIfArtifactNotSelected, SkipIfArtifactResultInCache,
    SkipIfMissingScript, SkipIfParentStepFailed, SkipIfStepDisabled, SkipIfStepResultInCache,
};
use crate::dag::{Graph, Node};
use crate::errors::Result;
use crate::steps::context::StepContext;
use crate::steps::info::{StepDefinition, StepInfo, build_steps_graph};
use crate::steps::logic::{
    ArtifactHooks, ArtifactOutcome, StepFactory, StepLogic, StepOutcome, WholeStepLogic,
};
use crate::workspace::{Artifact, PathMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOn {
    /// Once per package, in the package directory.
    Artifact,
    /// Once per flow, at the repo root.
    Root,
}

impl From<RunOnConfig> for RunOn {
    fn from(value: RunOnConfig) -> Self {
        match value {
            RunOnConfig::Artifact => RunOn::Artifact,
            RunOnConfig::Root => RunOn::Root,
        }
    }
}

/// Resolved configuration of one command step.
#[derive(Debug, Clone)]
pub struct CommandStepConfig {
    pub cmd: String,
    pub run_on: RunOn,
    pub enabled: bool,
    pub required_script: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub skip_if_passed_in_cache: bool,
    /// Step indexes whose result for the same package hash must be `passed`.
    pub require_passed: Vec<usize>,
    pub concurrency: Option<usize>,
}

impl CommandStepConfig {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            run_on: RunOn::Artifact,
            enabled: true,
            required_script: None,
            include: Vec::new(),
            exclude: Vec::new(),
            skip_if_passed_in_cache: true,
            require_passed: Vec::new(),
            concurrency: None,
        }
    }
}

/// A step that runs a shell command.
#[derive(Debug, Clone)]
pub struct CommandStep {
    config: CommandStepConfig,
}

impl CommandStep {
    pub fn new(config: CommandStepConfig) -> Self {
        Self { config }
    }
}

impl StepFactory for CommandStep {
    fn create(&self, ctx: StepContext) -> anyhow::Result<StepLogic> {
        let cfg = &self.config;

        let mut logic = match cfg.run_on {
            RunOn::Artifact => StepLogic::per_artifact(Arc::new(ArtifactCommand {
                cmd: cfg.cmd.clone(),
                flow_id: ctx.flow_id.clone(),
                step_name: ctx.step_info().display_name.clone(),
            })),
            RunOn::Root => StepLogic::whole_step(Arc::new(RootCommand {
                cmd: cfg.cmd.clone(),
                flow_id: ctx.flow_id.clone(),
                repo_path: ctx.repo_path.clone(),
                step_name: ctx.step_info().display_name.clone(),
            })),
        };

        logic = logic.step_constraint(Arc::new(SkipIfStepDisabled {
            enabled: cfg.enabled,
        }));
        if cfg.run_on == RunOn::Root && cfg.skip_if_passed_in_cache {
            logic = logic.step_constraint(Arc::new(SkipIfStepResultInCache {
                rerun_failures: true,
            }));
        }

        if !cfg.include.is_empty() || !cfg.exclude.is_empty() {
            logic = logic.artifact_constraint(Arc::new(SkipIfArtifactNotSelected {
                matcher: PathMatcher::new(&cfg.include, &cfg.exclude)?,
            }));
        }
        if let Some(script) = &cfg.required_script {
            logic = logic.artifact_constraint(Arc::new(SkipIfMissingScript {
                script: script.clone(),
            }));
        }
        logic = logic.artifact_constraint(Arc::new(SkipIfParentStepFailed));
        if cfg.skip_if_passed_in_cache {
            logic = logic.artifact_constraint(Arc::new(SkipIfArtifactResultInCache {
                rerun_failures: true,
            }));
        }
        for upstream in &cfg.require_passed {
            let node = ctx
                .steps
                .node(*upstream)
                .with_context(|| format!("unknown upstream step index {upstream}"))?;
            logic = logic.artifact_constraint(Arc::new(RequireUpstreamPassedInCache {
                upstream_step_id: node.data.step_id.clone(),
                upstream_display_name: node.data.display_name.clone(),
            }));
        }

        if let Some(limit) = cfg.concurrency {
            logic = logic.max_concurrency(limit);
        }
        Ok(logic)
    }
}

struct ArtifactCommand {
    cmd: String,
    flow_id: String,
    step_name: String,
}

impl ArtifactHooks for ArtifactCommand {
    fn on_artifact<'a>(
        &'a self,
        artifact: &'a Node<Artifact>,
    ) -> BoxFuture<'a, anyhow::Result<ArtifactOutcome>> {
        Box::pin(async move {
            let package = &artifact.data;
            let env = [
                ("MONOFLOW_FLOW_ID", self.flow_id.as_str()),
                ("MONOFLOW_PACKAGE_NAME", package.name()),
                ("MONOFLOW_PACKAGE_HASH", package.package_hash.as_str()),
            ];
            let label = format!("{}:{}", self.step_name, package.name());
            let status = run_shell(&self.cmd, &package.package_path, &env, &label).await?;
            Ok(outcome_from_exit(status))
        })
    }
}

struct RootCommand {
    cmd: String,
    flow_id: String,
    repo_path: PathBuf,
    step_name: String,
}

impl WholeStepLogic for RootCommand {
    fn run(&self) -> BoxFuture<'_, anyhow::Result<StepOutcome>> {
        Box::pin(async move {
            let env = [("MONOFLOW_FLOW_ID", self.flow_id.as_str())];
            let status = run_shell(&self.cmd, &self.repo_path, &env, &self.step_name).await?;
            let outcome = outcome_from_exit(status);
            let mut step = StepOutcome::new(outcome.status);
            step.notes = outcome.notes;
            Ok(step)
        })
    }
}

fn outcome_from_exit(status: ExitStatus) -> ArtifactOutcome {
    if status.success() {
        ArtifactOutcome::passed()
    } else {
        match status.code() {
            Some(code) => ArtifactOutcome::failed(format!("command exited with code {code}")),
            None => ArtifactOutcome::failed("command terminated by a signal"),
        }
    }
}

/// Run `cmd` through the platform shell in `cwd`, draining output to debug
/// logs.
async fn run_shell(
    cmd: &str,
    cwd: &Path,
    env: &[(&str, &str)],
    label: &str,
) -> anyhow::Result<ExitStatus> {
    info!(target_label = %label, cmd = %cmd, cwd = %cwd.display(), "starting command");

    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .current_dir(cwd)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning `{cmd}` for {label}"))?;

    let stdout = child.stdout.take().map(|s| drain(s, label.to_string(), "stdout"));
    let stderr = child.stderr.take().map(|s| drain(s, label.to_string(), "stderr"));

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for `{cmd}` of {label}"))?;

    for handle in [stdout, stderr].into_iter().flatten() {
        let _ = handle.await;
    }

    info!(
        target_label = %label,
        exit_code = ?status.code(),
        success = status.success(),
        "command exited"
    );
    Ok(status)
}

fn drain<R>(reader: R, label: String, stream: &'static str) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target_label = %label, stream, "{}", line);
        }
    })
}

/// Build the step graph and one [`CommandStep`] per `[step.<key>]`.
///
/// Step indexes follow the sorted step keys.
pub fn command_steps_from_config(
    cfg: &ConfigFile,
) -> Result<(Graph<StepInfo>, Vec<Arc<dyn StepFactory>>)> {
    let keys = cfg.step_keys();
    let index_of: HashMap<&str, usize> = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    let resolve = |names: &[String]| -> Vec<usize> {
        names
            .iter()
            .filter_map(|n| index_of.get(n.as_str()).copied())
            .collect()
    };

    let mut definitions = Vec::with_capacity(keys.len());
    let mut factories: Vec<Arc<dyn StepFactory>> = Vec::with_capacity(keys.len());

    for (key, step) in cfg.step.iter() {
        definitions.push(step_definition(key, step, resolve(&step.after)));

        let mut config = CommandStepConfig::new(step.cmd.clone());
        config.run_on = step.run_on.into();
        config.enabled = step.enabled;
        config.required_script = step.required_script.clone();
        config.include = step.include.clone();
        config.exclude = step.exclude.clone();
        config.skip_if_passed_in_cache = step.skip_if_passed_in_cache;
        config.require_passed = resolve(&step.require_passed);
        config.concurrency = step.concurrency;
        factories.push(Arc::new(CommandStep::new(config)));
    }

    Ok((build_steps_graph(definitions)?, factories))
}

fn step_definition(key: &str, step: &StepConfig, parents: Vec<usize>) -> StepDefinition {
    let name = step.step_name(key).to_string();
    StepDefinition {
        step_group: step.group.clone().unwrap_or_default(),
        display_name: step.display_name.clone().unwrap_or_else(|| key.to_string()),
        parents,
        fingerprint: format!("{:?}\0{}", step.run_on, step.cmd),
        step_name: name,
    }
}
