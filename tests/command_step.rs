// tests/command_step.rs
//
// Runs real shell commands against a repo laid out in a temp directory.
#![cfg(unix)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use monoflow::config::{ConfigFile, parse_str};
use monoflow::engine::Flow;
use monoflow::fs::RealFileSystem;
use monoflow::prepare_repo;
use monoflow::report::FlowReport;
use monoflow::status::{ExecutionStatus, Status};
use monoflow::steps::command_steps_from_config;
use monoflow::workspace::StaticTrackedFiles;
use monoflow_test_utils::{cell, init_tracing, memory_result_cache, step_result, with_timeout};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn write(root: &Path, rel: &str, content: &str, tracked: &mut Vec<PathBuf>) -> TestResult {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    tracked.push(PathBuf::from(rel));
    Ok(())
}

/// `web` depends on `ui`; only `ui` declares a `lint` script.
fn workspace() -> Result<(TempDir, StaticTrackedFiles), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    let mut tracked = Vec::new();

    write(root, "README.md", "# fixture", &mut tracked)?;
    write(
        root,
        "packages/ui/package.json",
        r#"{"name": "ui", "scripts": {"lint": "eslint ."}}"#,
        &mut tracked,
    )?;
    write(root, "packages/ui/index.js", "export default 1;", &mut tracked)?;
    write(
        root,
        "packages/web/package.json",
        r#"{"name": "web", "dependencies": {"ui": "*"}}"#,
        &mut tracked,
    )?;
    write(root, "packages/web/index.js", "import ui from 'ui';", &mut tracked)?;

    Ok((dir, StaticTrackedFiles::new(tracked)))
}

async fn run(
    root: &Path,
    tracked: &StaticTrackedFiles,
    cfg: &ConfigFile,
) -> Result<FlowReport, Box<dyn Error>> {
    let hashed = prepare_repo(&RealFileSystem, tracked, root, cfg)?;
    let (steps, factories) = command_steps_from_config(cfg)?;
    let flow = Flow::new(hashed, root, steps, factories, memory_result_cache())?;
    Ok(with_timeout(flow.run()).await?)
}

#[tokio::test]
async fn commands_run_in_each_package_with_flow_env() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.stamp]
cmd = 'echo "$MONOFLOW_PACKAGE_NAME $MONOFLOW_PACKAGE_HASH" > stamp.txt'
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    for name in ["ui", "web"] {
        assert_eq!(cell(&report, 0, name).status(), Some(Status::Passed));
        let stamp = fs::read_to_string(dir.path().join("packages").join(name).join("stamp.txt"))?;
        let mut parts = stamp.split_whitespace();
        assert_eq!(parts.next(), Some(name));
        assert_eq!(parts.next().map(str::len), Some(8));
    }
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_fails_the_cell() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.test]
cmd = 'if [ "$MONOFLOW_PACKAGE_NAME" = "ui" ]; then exit 3; fi'

[step.publish]
cmd = "true"
after = ["test"]
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    // Steps are indexed by sorted key: publish = 0, test = 1.
    let ui = cell(&report, 1, "ui");
    assert_eq!(ui.status(), Some(Status::Failed));
    assert!(ui.notes().iter().any(|n| n == "command exited with code 3"));
    assert_eq!(cell(&report, 1, "web").status(), Some(Status::Passed));

    let publish_ui = cell(&report, 0, "ui");
    assert_eq!(publish_ui.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(publish_ui.status(), Some(Status::SkippedAsFailed));
    assert_eq!(cell(&report, 0, "web").status(), Some(Status::Passed));
    assert!(!report.is_success());
    Ok(())
}

#[tokio::test]
async fn missing_script_and_selection_skip_as_passed() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.lint]
cmd = "true"
required_script = "lint"

[step.web-only]
cmd = "true"
include = ["packages/web"]
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    assert_eq!(cell(&report, 0, "ui").status(), Some(Status::Passed));
    let web_lint = cell(&report, 0, "web");
    assert_eq!(web_lint.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(web_lint.status(), Some(Status::SkippedAsPassed));

    assert_eq!(cell(&report, 1, "web").status(), Some(Status::Passed));
    assert_eq!(cell(&report, 1, "ui").status(), Some(Status::SkippedAsPassed));
    assert!(report.is_success());
    Ok(())
}

#[tokio::test]
async fn root_step_runs_once_at_the_repo_root() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.install]
cmd = "echo run >> install.log"
run_on = "root"
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    let log = fs::read_to_string(dir.path().join("install.log"))?;
    assert_eq!(log.lines().count(), 1);
    assert_eq!(
        step_result(&report, 0).execution_status(),
        ExecutionStatus::Done
    );
    for name in ["ui", "web"] {
        assert_eq!(cell(&report, 0, name).status(), Some(Status::Passed));
    }
    Ok(())
}

#[tokio::test]
async fn disabled_step_is_skipped() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.deploy]
cmd = "touch deployed"
enabled = false
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    let deploy = step_result(&report, 0);
    assert_eq!(deploy.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(deploy.status(), Some(Status::SkippedAsPassed));
    assert!(!dir.path().join("packages/ui/deployed").exists());
    Ok(())
}

#[tokio::test]
async fn root_step_does_not_run_after_its_parent_failed() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.release]
cmd = "echo run >> release.log"
run_on = "root"
after = ["test"]

[step.test]
cmd = "exit 1"
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    // Sorted keys: release = 0, test = 1.
    assert!(!dir.path().join("release.log").exists());
    for name in ["ui", "web"] {
        assert_eq!(cell(&report, 1, name).status(), Some(Status::Failed));
        let release = cell(&report, 0, name);
        assert_eq!(release.execution_status(), ExecutionStatus::Aborted);
        assert_eq!(release.status(), Some(Status::SkippedAsFailed));
    }
    let release = step_result(&report, 0);
    assert_eq!(release.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(release.status(), Some(Status::SkippedAsFailed));
    Ok(())
}

#[tokio::test]
async fn root_step_only_covers_selected_packages() -> TestResult {
    init_tracing();
    let (dir, tracked) = workspace()?;
    let cfg = ConfigFile::try_from(parse_str(
        r#"
[step.bundle]
cmd = "echo run >> bundle.log"
run_on = "root"
include = ["packages/web"]
"#,
    )?)?;

    let report = run(dir.path(), &tracked, &cfg).await?;

    let log = fs::read_to_string(dir.path().join("bundle.log"))?;
    assert_eq!(log.lines().count(), 1);
    assert_eq!(cell(&report, 0, "web").status(), Some(Status::Passed));
    let ui = cell(&report, 0, "ui");
    assert_eq!(ui.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(ui.status(), Some(Status::SkippedAsPassed));
    assert!(report.is_success());
    Ok(())
}
