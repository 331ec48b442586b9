pub mod builders;
pub mod recording;

use std::sync::{Arc, Once};
use std::time::Duration;

use monoflow::cache::{MemoryCache, ResultCache};
use monoflow::dag::Graph;
use monoflow::engine::Flow;
use monoflow::report::FlowReport;
use monoflow::status::StepResult;
use monoflow::steps::{StepFactory, StepInfo};
use tracing_subscriber::{EnvFilter, fmt};

use crate::builders::{REPO_ROOT, RepoBuilder};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Result cache over a fresh in-memory store.
pub fn memory_result_cache() -> ResultCache {
    ResultCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600))
}

/// Hash `repo` and run one flow over it.
pub async fn run_flow(
    repo: &RepoBuilder,
    steps: Graph<StepInfo>,
    factories: Vec<Arc<dyn StepFactory>>,
    cache: &ResultCache,
) -> monoflow::errors::Result<FlowReport> {
    Flow::new(repo.hash(), REPO_ROOT, steps, factories, cache.clone())?
        .run()
        .await
}

/// Result of step `step_index` on the artifact named `artifact`.
pub fn cell<'a>(report: &'a FlowReport, step_index: usize, artifact: &str) -> &'a StepResult {
    let artifact_index = report
        .state
        .by_artifact()
        .iter()
        .position(|a| a.artifact_name == artifact)
        .unwrap_or_else(|| panic!("no artifact named {artifact}"));
    report
        .state
        .cell(step_index, artifact_index)
        .expect("step index out of range")
}

/// Aggregate result of step `step_index`.
pub fn step_result(report: &FlowReport, step_index: usize) -> &StepResult {
    report
        .state
        .step_result(step_index)
        .expect("step index out of range")
}
