// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod constraints;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod hash;
pub mod logging;
pub mod report;
pub mod status;
pub mod steps;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::{FileCache, ImmutableCache, MemoryCache, ResultCache, TieredCache};
use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::{CacheKind, ConfigFile};
use crate::dag::Graph;
use crate::engine::Flow;
use crate::fs::{FileSystem, RealFileSystem};
use crate::hash::{HashedRepo, compute_hashes};
use crate::steps::{StepInfo, command_steps_from_config};
use crate::workspace::{GitTrackedFiles, TrackedFiles, discover_packages};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - tracked-file listing and package discovery
/// - hashing
/// - the result cache
/// - the step graph and the flow itself
///
/// Returns whether the flow's combined status is a success.
pub async fn run(args: CliArgs) -> Result<bool> {
    let repo_path = args
        .repo
        .canonicalize()
        .with_context(|| format!("resolving repo path {:?}", args.repo))?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&repo_path));
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;

    let hashed = prepare_repo(&RealFileSystem, &GitTrackedFiles, &repo_path, &cfg)?;
    let (steps, factories) = command_steps_from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&hashed, &steps);
        return Ok(true);
    }

    let cache = open_cache(&cfg, &repo_path)?;
    let flow = Flow::new(hashed, &repo_path, steps, factories, cache)?;
    let report = flow.run().await?;

    print!("{}", report.render_table());

    if let Some(json_path) = &args.json {
        std::fs::write(json_path, report.to_json()?)
            .with_context(|| format!("writing JSON report to {:?}", json_path))?;
        info!(path = ?json_path, "wrote JSON report");
    }

    Ok(report.is_success())
}

/// List tracked files, discover packages and hash them.
///
/// Any failure here is fatal: nothing runs on a partially hashed repo.
pub fn prepare_repo(
    fs: &dyn FileSystem,
    tracked: &dyn TrackedFiles,
    repo_path: &Path,
    cfg: &ConfigFile,
) -> crate::errors::Result<HashedRepo> {
    let files = tracked.list(repo_path)?;
    debug!(count = files.len(), "tracked files");

    let packages = discover_packages(fs, repo_path, &files, &cfg.config.packages)?;
    info!(count = packages.len(), "discovered packages");

    let hashed = compute_hashes(
        fs,
        repo_path,
        packages,
        &files,
        &cfg.config.build_invalidation_key,
    )?;
    info!(repo_hash = %hashed.repo_hash, "hashed repo");
    Ok(hashed)
}

/// Build the result cache selected by `[config].cache`.
pub fn open_cache(cfg: &ConfigFile, repo_path: &Path) -> Result<ResultCache> {
    let ttl = Duration::from_secs(cfg.config.cache_ttl_secs);

    let store: Arc<dyn ImmutableCache> = match cfg.config.cache {
        CacheKind::Memory => Arc::new(MemoryCache::new()),
        CacheKind::File => {
            let dir = resolve_cache_dir(repo_path, &cfg.config.cache_dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating cache directory {:?}", dir))?;
            info!(dir = ?dir, "using file cache");
            Arc::new(TieredCache::new(Arc::new(FileCache::new(&dir)), ttl))
        }
    };

    Ok(ResultCache::new(store, ttl))
}

fn resolve_cache_dir(repo_path: &Path, cache_dir: &Path) -> PathBuf {
    if cache_dir.is_absolute() {
        cache_dir.to_path_buf()
    } else {
        repo_path.join(cache_dir)
    }
}

/// Print packages, hashes and the step graph without running anything.
fn print_dry_run(hashed: &HashedRepo, steps: &Graph<StepInfo>) {
    println!("monoflow dry-run");
    println!("  repo hash: {}", hashed.repo_hash);
    println!("  root files hash: {}", hashed.root_files_hash);
    println!();

    println!("packages ({}):", hashed.artifacts.len());
    for node in hashed.artifacts.nodes() {
        let artifact = &node.data;
        println!(
            "  - {} [{}] {}",
            artifact.name(),
            artifact.package_hash,
            artifact.relative_package_path.display()
        );
        if !node.parents_indexes.is_empty() {
            let deps: Vec<&str> = node
                .parents_indexes
                .iter()
                .map(|i| hashed.artifacts.nodes()[*i].data.name())
                .collect();
            println!("      depends on: {deps:?}");
        }
    }
    println!();

    println!("steps ({}):", steps.len());
    for node in steps.nodes() {
        let step = &node.data;
        println!("  - {} [{}]", step.display_name, step.step_id);
        if !node.parents_indexes.is_empty() {
            let after: Vec<&str> = node
                .parents_indexes
                .iter()
                .map(|i| steps.nodes()[*i].data.display_name.as_str())
                .collect();
            println!("      after: {after:?}");
        }
    }

    debug!("dry-run complete (no execution)");
}
