// src/workspace/discover.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{MonoflowError, Result};
use crate::fs::FileSystem;
use crate::workspace::package::{PackageInfo, PackageJson};
use crate::workspace::path_utils::unix_str;
use crate::workspace::patterns::PathMatcher;

const PACKAGE_JSON: &str = "package.json";

/// Find the monorepo packages among the tracked files.
///
/// A package is a tracked `package.json` below the repo root whose directory
/// matches one of `patterns` (e.g. `"packages/*"`). The root `package.json`
/// is never a package. Results are sorted by relative directory so the
/// artifact graph is built in a stable order.
pub fn discover_packages(
    fs: &dyn FileSystem,
    repo_path: &Path,
    tracked: &[PathBuf],
    patterns: &[String],
) -> Result<Vec<PackageInfo>> {
    let matcher = PathMatcher::new(patterns, &[])
        .map_err(|e| MonoflowError::ConfigError(format!("{e:#}")))?;

    let mut package_dirs: Vec<&Path> = tracked
        .iter()
        .filter(|p| p.file_name().is_some_and(|n| n == PACKAGE_JSON))
        .filter_map(|p| p.parent())
        .filter(|dir| !dir.as_os_str().is_empty())
        .filter(|dir| matcher.matches(&unix_str(dir)))
        .collect();
    package_dirs.sort();
    package_dirs.dedup();

    let mut packages = Vec::with_capacity(package_dirs.len());
    let mut seen_names: HashMap<String, PathBuf> = HashMap::new();

    for dir in package_dirs {
        let manifest = repo_path.join(dir).join(PACKAGE_JSON);
        let contents = fs.read_to_string(&manifest)?;
        let package_json: PackageJson = serde_json::from_str(&contents).map_err(|e| {
            MonoflowError::ConfigError(format!("invalid {:?}: {}", manifest, e))
        })?;

        if let Some(previous) = seen_names.insert(package_json.name.clone(), dir.to_path_buf()) {
            return Err(MonoflowError::ConfigError(format!(
                "package name '{}' is declared by both {:?} and {:?}",
                package_json.name, previous, dir
            )));
        }

        debug!(package = %package_json.name, dir = ?dir, "discovered package");
        packages.push(PackageInfo {
            package_path: repo_path.join(dir),
            package_json,
        });
    }

    info!(count = packages.len(), "discovered monorepo packages");
    Ok(packages)
}
