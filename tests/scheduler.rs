// tests/scheduler.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use monoflow::constraints::{ConstraintResult, SkipIfParentStepFailed};
use monoflow::dag::Node;
use monoflow::engine::Flow;
use monoflow::errors::MonoflowError;
use monoflow::status::{ExecutionStatus, Status, StepResult};
use monoflow::steps::{
    ArtifactHooks, ArtifactOutcome, StepContext, StepFactory, StepLogic, StepOutcome,
};
use monoflow::workspace::Artifact;
use monoflow_test_utils::builders::{REPO_ROOT, RepoBuilder, steps_graph};
use monoflow_test_utils::recording::{
    Behaviour, Call, CallLog, RecordingStep, ScriptedConstraint, whole_step,
};
use monoflow_test_utils::{
    cell, init_tracing, memory_result_cache, run_flow, step_result, with_timeout,
};

type TestResult = Result<(), Box<dyn Error>>;

/// `app` depends on `core`.
fn core_and_app() -> RepoBuilder {
    RepoBuilder::new()
        .package("core", &[])
        .package("app", &["core"])
}

fn start(step: &str, artifact: &str) -> Call {
    Call::ArtifactStart {
        step: step.to_string(),
        artifact: artifact.to_string(),
    }
}

fn end(step: &str, artifact: &str) -> Call {
    Call::ArtifactEnd {
        step: step.to_string(),
        artifact: artifact.to_string(),
    }
}

#[tokio::test]
async fn cells_wait_for_parent_steps_and_parent_artifacts() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let step = RecordingStep::new(&log).delay(Duration::from_millis(10));

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("build", &[]), ("test", &[0])]),
        vec![step.clone().boxed(), step.boxed()],
        &memory_result_cache(),
    ))
    .await?;

    let pos = |call: Call| log.position(&call).unwrap_or_else(|| panic!("missing {call:?}"));

    // Parent artifact before child artifact, within one step.
    assert!(pos(end("build", "core")) < pos(start("build", "app")));
    assert!(pos(end("test", "core")) < pos(start("test", "app")));
    // Parent step before child step, per artifact.
    assert!(pos(end("build", "core")) < pos(start("test", "core")));
    assert!(pos(end("build", "app")) < pos(start("test", "app")));

    for step_index in 0..2 {
        assert_eq!(step_result(&report, step_index).status(), Some(Status::Passed));
        assert_eq!(
            step_result(&report, step_index).execution_status(),
            ExecutionStatus::Done
        );
    }
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn independent_cells_do_not_wait_for_each_other() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let repo = RepoBuilder::new()
        .package("left", &[])
        .package("right", &[]);

    with_timeout(run_flow(
        &repo,
        steps_graph(&[("build", &[])]),
        vec![RecordingStep::new(&log).delay(Duration::from_millis(30)).boxed()],
        &memory_result_cache(),
    ))
    .await?;

    // Both start before either ends.
    let first_end = log
        .calls()
        .iter()
        .position(|c| matches!(c, Call::ArtifactEnd { .. }))
        .unwrap();
    assert_eq!(log.artifacts_run("build").len(), 2);
    assert!(log.position(&start("build", "left")).unwrap() < first_end);
    assert!(log.position(&start("build", "right")).unwrap() < first_end);
    Ok(())
}

#[tokio::test]
async fn step_hooks_run_exactly_once_around_all_artifacts() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let mut repo = RepoBuilder::new();
    for i in 0..6 {
        repo = repo.package(&format!("pkg{i}"), &[]);
    }

    with_timeout(run_flow(
        &repo,
        steps_graph(&[("lint", &[])]),
        vec![
            RecordingStep::new(&log)
                .delay(Duration::from_millis(5))
                .max_concurrency(2)
                .boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let before = Call::Before {
        step: "lint".into(),
    };
    let after = Call::After {
        step: "lint".into(),
    };
    assert_eq!(log.count(&before), 1);
    assert_eq!(log.count(&after), 1);

    let calls = log.calls();
    let before_pos = log.position(&before).unwrap();
    let after_pos = log.position(&after).unwrap();
    for (i, call) in calls.iter().enumerate() {
        match call {
            Call::ArtifactStart { .. } => assert!(before_pos < i),
            Call::ArtifactEnd { .. } => assert!(i < after_pos),
            _ => {}
        }
    }
    assert_eq!(log.artifacts_run("lint").len(), 6);
    Ok(())
}

#[tokio::test]
async fn max_concurrency_limits_running_artifacts() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let mut repo = RepoBuilder::new();
    for i in 0..6 {
        repo = repo.package(&format!("pkg{i}"), &[]);
    }

    with_timeout(run_flow(
        &repo,
        steps_graph(&[("test", &[])]),
        vec![
            RecordingStep::new(&log)
                .delay(Duration::from_millis(10))
                .max_concurrency(2)
                .boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let mut running = 0usize;
    let mut peak = 0usize;
    for call in log.calls() {
        match call {
            Call::ArtifactStart { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            Call::ArtifactEnd { .. } => running -= 1,
            _ => {}
        }
    }
    assert!(peak <= 2, "peak concurrency was {peak}");
    assert_eq!(log.artifacts_run("test").len(), 6);
    Ok(())
}

#[tokio::test]
async fn failing_artifact_fails_its_cell_only() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("build", &[])]),
        vec![
            RecordingStep::new(&log)
                .behaviour_for("core", Behaviour::Error("compile error".into()))
                .boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let core = cell(&report, 0, "core");
    assert_eq!(core.execution_status(), ExecutionStatus::Done);
    assert_eq!(core.status(), Some(Status::Failed));
    assert!(core.errors()[0].message.contains("compile error"));

    // The dependent still ran: ordering waits for terminal, not for success.
    assert_eq!(cell(&report, 0, "app").status(), Some(Status::Passed));

    assert_eq!(step_result(&report, 0).status(), Some(Status::Failed));
    assert!(!report.is_success());
    Ok(())
}

#[tokio::test]
async fn panicking_artifact_becomes_a_failed_cell() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("build", &[])]),
        vec![
            RecordingStep::new(&log)
                .behaviour_for("app", Behaviour::Panic("kaboom".into()))
                .boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let app = cell(&report, 0, "app");
    assert_eq!(app.status(), Some(Status::Failed));
    assert!(app.errors()[0].message.contains("kaboom"));
    assert_eq!(cell(&report, 0, "core").status(), Some(Status::Passed));
    Ok(())
}

#[tokio::test]
async fn parent_step_failure_skips_dependent_cells() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("build", &[]), ("test", &[0])]),
        vec![
            RecordingStep::new(&log)
                .behaviour_for("core", Behaviour::Return(Status::Failed))
                .boxed(),
            RecordingStep::new(&log).skip_if_parent_failed().boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let test_core = cell(&report, 1, "core");
    assert_eq!(test_core.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(test_core.status(), Some(Status::SkippedAsFailed));
    assert!(test_core.notes().iter().any(|n| n.contains("build")));
    assert_eq!(cell(&report, 1, "app").status(), Some(Status::Passed));

    assert_eq!(log.artifacts_run("test"), vec!["app".to_string()]);

    // One cell ran, so the aggregate is done; the skip raises its status.
    let test = step_result(&report, 1);
    assert_eq!(test.execution_status(), ExecutionStatus::Done);
    assert_eq!(test.status(), Some(Status::SkippedAsFailed));
    Ok(())
}

#[tokio::test]
async fn skipped_step_aborts_every_cell_without_running_hooks() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let recording = RecordingStep::new(&log);
    let factory = move |ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(recording.create(ctx)?.step_constraint(Arc::new(ScriptedConstraint::Returns(
            ConstraintResult::skip(Status::SkippedAsPassed).with_note("nothing to deploy"),
        ))))
    };

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("deploy", &[])]),
        vec![Arc::new(factory) as Arc<dyn StepFactory>],
        &memory_result_cache(),
    ))
    .await?;

    assert!(log.calls().is_empty());
    for name in ["core", "app"] {
        let c = cell(&report, 0, name);
        assert_eq!(c.execution_status(), ExecutionStatus::Aborted);
        assert_eq!(c.status(), Some(Status::SkippedAsPassed));
        assert_eq!(c.notes(), ["nothing to deploy".to_string()]);
    }
    let deploy = step_result(&report, 0);
    assert_eq!(deploy.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(deploy.status(), Some(Status::SkippedAsPassed));
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn erroring_artifact_constraint_skips_as_failed() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let recording = RecordingStep::new(&log);
    let factory = move |ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(recording
            .create(ctx)?
            .artifact_constraint(Arc::new(ScriptedConstraint::Errors(
                "store offline".into(),
            ))))
    };

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("test", &[])]),
        vec![Arc::new(factory) as Arc<dyn StepFactory>],
        &memory_result_cache(),
    ))
    .await?;

    assert!(log.artifacts_run("test").is_empty());
    let core = cell(&report, 0, "core");
    assert_eq!(core.status(), Some(Status::SkippedAsFailed));
    assert!(core.errors()[0].message.contains("store offline"));
    assert!(!report.is_success());
    Ok(())
}

#[tokio::test]
async fn steps_without_artifacts_skip_as_passed() -> TestResult {
    init_tracing();
    let log = CallLog::new();

    let report = with_timeout(run_flow(
        &RepoBuilder::new().file("README.md", "empty"),
        steps_graph(&[("build", &[]), ("test", &[0])]),
        vec![
            RecordingStep::new(&log).boxed(),
            RecordingStep::new(&log).boxed(),
        ],
        &memory_result_cache(),
    ))
    .await?;

    for step_index in 0..2 {
        let result = step_result(&report, step_index);
        assert_eq!(result.execution_status(), ExecutionStatus::Aborted);
        assert_eq!(result.status(), Some(Status::SkippedAsPassed));
        assert!(result.notes().iter().any(|n| n == "no artifacts to process"));
    }
    assert!(log.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn whole_step_waits_for_parents_and_fills_every_cell() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let repo = core_and_app();
    let hashed = repo.hash();
    let core_index = hashed
        .artifacts
        .nodes()
        .iter()
        .position(|n| n.data.name() == "core")
        .unwrap();

    let report = with_timeout(run_flow(
        &repo,
        steps_graph(&[("build", &[]), ("publish", &[0])]),
        vec![
            RecordingStep::new(&log).delay(Duration::from_millis(10)).boxed(),
            whole_step(
                &log,
                StepOutcome::passed()
                    .with_artifact(core_index, ArtifactOutcome::failed("registry rejected core")),
            ),
        ],
        &memory_result_cache(),
    ))
    .await?;

    let publish = log
        .position(&Call::WholeStep {
            step: "publish".into(),
        })
        .unwrap();
    assert!(log.position(&end("build", "core")).unwrap() < publish);
    assert!(log.position(&end("build", "app")).unwrap() < publish);

    assert_eq!(cell(&report, 1, "app").status(), Some(Status::Passed));
    let core = cell(&report, 1, "core");
    assert_eq!(core.status(), Some(Status::Failed));
    assert!(core.notes().iter().any(|n| n.contains("registry rejected core")));

    let aggregate = step_result(&report, 1);
    assert_eq!(aggregate.execution_status(), ExecutionStatus::Done);
    assert_eq!(aggregate.status(), Some(Status::Failed));
    Ok(())
}

#[tokio::test]
async fn whole_step_honours_artifact_constraints() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let inner = whole_step(&log, StepOutcome::passed());
    let publish = move |ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(inner.create(ctx)?.artifact_constraint(Arc::new(SkipIfParentStepFailed)))
    };

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("build", &[]), ("publish", &[0])]),
        vec![
            RecordingStep::new(&log)
                .behaviour_for("core", Behaviour::Return(Status::Failed))
                .boxed(),
            Arc::new(publish) as Arc<dyn StepFactory>,
        ],
        &memory_result_cache(),
    ))
    .await?;

    let runs = log
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::WholeStep { .. }))
        .count();
    assert_eq!(runs, 1);

    let core = cell(&report, 1, "core");
    assert_eq!(core.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(core.status(), Some(Status::SkippedAsFailed));
    assert!(core.notes().iter().any(|n| n.contains("build")), "{:?}", core.notes());
    assert_eq!(cell(&report, 1, "app").status(), Some(Status::Passed));

    let aggregate = step_result(&report, 1);
    assert_eq!(aggregate.execution_status(), ExecutionStatus::Done);
    assert_eq!(aggregate.status(), Some(Status::SkippedAsFailed));
    Ok(())
}

#[tokio::test]
async fn whole_step_does_not_run_when_every_artifact_skips() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let inner = whole_step(&log, StepOutcome::passed());
    let factory = move |ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(inner
            .create(ctx)?
            .artifact_constraint(Arc::new(ScriptedConstraint::Returns(
                ConstraintResult::skip(Status::SkippedAsPassed).with_note("not selected"),
            ))))
    };

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("release", &[])]),
        vec![Arc::new(factory) as Arc<dyn StepFactory>],
        &memory_result_cache(),
    ))
    .await?;

    assert!(log.calls().is_empty());
    for name in ["core", "app"] {
        let c = cell(&report, 0, name);
        assert_eq!(c.execution_status(), ExecutionStatus::Aborted);
        assert_eq!(c.notes(), ["not selected".to_string()]);
    }
    let aggregate = step_result(&report, 0);
    assert_eq!(aggregate.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(aggregate.status(), Some(Status::SkippedAsPassed));
    Ok(())
}

/// Hooks whose `on_before_artifacts` always fails.
struct BrokenSetup;

impl ArtifactHooks for BrokenSetup {
    fn on_before_artifacts(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Err(anyhow::anyhow!("docker login failed")) })
    }

    fn on_artifact<'a>(
        &'a self,
        _artifact: &'a Node<Artifact>,
    ) -> BoxFuture<'a, anyhow::Result<ArtifactOutcome>> {
        Box::pin(async { Ok(ArtifactOutcome::passed()) })
    }
}

#[tokio::test]
async fn failed_before_hook_skips_cells_as_failed() -> TestResult {
    init_tracing();
    let factory = |_ctx: StepContext| -> anyhow::Result<StepLogic> {
        Ok(StepLogic::per_artifact(Arc::new(BrokenSetup)))
    };

    let report = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("publish", &[])]),
        vec![Arc::new(factory) as Arc<dyn StepFactory>],
        &memory_result_cache(),
    ))
    .await?;

    for name in ["core", "app"] {
        let c = cell(&report, 0, name);
        assert_eq!(c.execution_status(), ExecutionStatus::Aborted);
        assert_eq!(c.status(), Some(Status::SkippedAsFailed));
        assert!(c.errors()[0].message.contains("docker login failed"));
    }
    assert_eq!(
        step_result(&report, 0).execution_status(),
        ExecutionStatus::Aborted
    );
    Ok(())
}

#[tokio::test]
async fn factory_error_is_fatal() -> TestResult {
    init_tracing();
    let factory = |_ctx: StepContext| -> anyhow::Result<StepLogic> {
        Err(anyhow::anyhow!("missing credentials"))
    };

    let err = with_timeout(run_flow(
        &core_and_app(),
        steps_graph(&[("deploy", &[])]),
        vec![Arc::new(factory) as Arc<dyn StepFactory>],
        &memory_result_cache(),
    ))
    .await
    .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("creating step 'deploy'"), "{message}");
    Ok(())
}

#[tokio::test]
async fn factory_count_must_match_steps() {
    let log = CallLog::new();
    let err = Flow::new(
        core_and_app().hash(),
        REPO_ROOT,
        steps_graph(&[("a", &[]), ("b", &[0])]),
        vec![RecordingStep::new(&log).boxed()],
        memory_result_cache(),
    )
    .unwrap_err();
    assert!(matches!(err, MonoflowError::ConfigError(_)));
}

#[tokio::test]
async fn observers_see_every_cell_move_forward() -> TestResult {
    init_tracing();
    let log = CallLog::new();
    let repo = core_and_app();
    let flow = Flow::new(
        repo.hash(),
        REPO_ROOT,
        steps_graph(&[("build", &[]), ("test", &[0])]),
        vec![
            RecordingStep::new(&log).boxed(),
            RecordingStep::new(&log).boxed(),
        ],
        memory_result_cache(),
    )?
    .with_flow_id("observed");
    let mut events = flow.subscribe();

    let report = with_timeout(flow.run()).await?;
    assert_eq!(report.flow_id, "observed");

    let mut seen: Vec<StepResult> = Vec::new();
    let mut step_events = 0;
    while let Ok(event) = events.try_recv() {
        match event.artifact_index {
            Some(_) => seen.push(event.result),
            None => step_events += 1,
        }
    }

    // Each of the four cells goes running then done; each step goes
    // running then done.
    assert_eq!(seen.len(), 8);
    assert_eq!(step_events, 4);
    Ok(())
}
