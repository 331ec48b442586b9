// src/hash/artifacts.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dag::Graph;
use crate::errors::{MonoflowError, Result};
use crate::fs::FileSystem;
use crate::hash::digest::ShortHasher;
use crate::workspace::package::{Artifact, PackageInfo};
use crate::workspace::path_utils::path_key;

/// Output of [`compute_hashes`].
#[derive(Debug, Clone)]
pub struct HashedRepo {
    pub artifacts: Graph<Artifact>,
    /// Hash of every tracked file outside a package directory.
    pub root_files_hash: String,
    /// Root files plus every combined package hash, in graph order.
    pub repo_hash: String,
}

/// Compute content hashes for every package and the repo as a whole.
///
/// `tracked_files` are repo-relative paths from version control. Paths that
/// no longer exist on disk are dropped. Any read failure aborts: a partial
/// hash would silently corrupt the result cache.
pub fn compute_hashes(
    fs: &dyn FileSystem,
    repo_path: &Path,
    packages: Vec<PackageInfo>,
    tracked_files: &[PathBuf],
    build_invalidation_key: &str,
) -> Result<HashedRepo> {
    let package_dirs = relative_package_dirs(repo_path, &packages)?;

    let existing: Vec<&PathBuf> = tracked_files
        .iter()
        .filter(|rel| fs.is_file(&repo_path.join(rel)))
        .collect();

    if existing.len() < tracked_files.len() {
        debug!(
            dropped = tracked_files.len() - existing.len(),
            "ignoring tracked files deleted from the working tree"
        );
    }

    // Partition into root files and per-package files (package-relative).
    let mut root_files: Vec<(Vec<u8>, PathBuf)> = Vec::new();
    let mut package_files: Vec<Vec<(Vec<u8>, PathBuf)>> = vec![Vec::new(); packages.len()];

    for rel in existing {
        match owning_package(&package_dirs, rel) {
            Some(index) => {
                let within = rel
                    .strip_prefix(&package_dirs[index])
                    .map(path_key)
                    .unwrap_or_else(|_| path_key(rel));
                package_files[index].push((within, repo_path.join(rel)));
            }
            None => root_files.push((path_key(rel), repo_path.join(rel))),
        }
    }

    let root_files_hash = hash_files(fs, &mut root_files, build_invalidation_key)?;
    debug!(hash = %root_files_hash, files = root_files.len(), "hashed root files");

    let mut isolated = Vec::with_capacity(packages.len());
    for (index, files) in package_files.iter_mut().enumerate() {
        let hash = hash_files(fs, files, build_invalidation_key)?;
        debug!(
            package = %packages[index].package_json.name,
            hash = %hash,
            files = files.len(),
            "hashed package files"
        );
        isolated.push(hash);
    }

    let parents = dependency_parents(&packages);
    let graph = Graph::from_parents(isolated, parents)?;

    // Heads first; a node is combined only once all its parents are final.
    let mut combined: Vec<Option<String>> = vec![None; graph.len()];
    for index in graph.topological_order() {
        let node = &graph.nodes()[index];
        let mut hasher = ShortHasher::new();
        hasher.str_field(&root_files_hash).str_field(&node.data);
        for parent in &node.parents_indexes {
            let parent_hash = combined[*parent].as_deref().ok_or_else(|| {
                MonoflowError::InvariantViolation(format!(
                    "parent {parent} of package {index} was not hashed before it"
                ))
            })?;
            hasher.str_field(parent_hash);
        }
        combined[index] = Some(hasher.finish());
    }

    let combined: Vec<String> = combined
        .into_iter()
        .enumerate()
        .map(|(index, hash)| {
            hash.ok_or_else(|| {
                MonoflowError::InvariantViolation(format!("package {index} was never hashed"))
            })
        })
        .collect::<Result<_>>()?;

    let mut repo_hasher = ShortHasher::new();
    repo_hasher.str_field(&root_files_hash);
    for hash in &combined {
        repo_hasher.str_field(hash);
    }
    let repo_hash = repo_hasher.finish();

    let mut packages: Vec<Option<PackageInfo>> = packages.into_iter().map(Some).collect();
    let artifacts = graph.map(|node| {
        let info = packages[node.index].take().unwrap_or_else(|| PackageInfo {
            package_path: PathBuf::new(),
            package_json: Default::default(),
        });
        Artifact {
            package_path: info.package_path,
            relative_package_path: package_dirs[node.index].clone(),
            package_json: info.package_json,
            isolated_hash: node.data.clone(),
            package_hash: combined[node.index].clone(),
        }
    });

    for artifact in artifacts.nodes() {
        info!(
            package = %artifact.data.name(),
            hash = %artifact.data.package_hash,
            "computed package hash"
        );
    }
    info!(repo_hash = %repo_hash, packages = artifacts.len(), "computed repo hash");

    Ok(HashedRepo {
        artifacts,
        root_files_hash,
        repo_hash,
    })
}

fn relative_package_dirs(repo_path: &Path, packages: &[PackageInfo]) -> Result<Vec<PathBuf>> {
    packages
        .iter()
        .map(|p| {
            p.package_path
                .strip_prefix(repo_path)
                .map(Path::to_path_buf)
                .map_err(|_| {
                    MonoflowError::ConfigError(format!(
                        "package {:?} is outside the repository {:?}",
                        p.package_path, repo_path
                    ))
                })
        })
        .collect()
}

/// The deepest package directory containing `rel`, if any.
fn owning_package(package_dirs: &[PathBuf], rel: &Path) -> Option<usize> {
    package_dirs
        .iter()
        .enumerate()
        .filter(|(_, dir)| !dir.as_os_str().is_empty() && rel.starts_with(dir))
        .max_by_key(|(_, dir)| dir.components().count())
        .map(|(index, _)| index)
}

/// Hash `(relative path, content)` of every file in path order, then the
/// build invalidation key.
fn hash_files(
    fs: &dyn FileSystem,
    files: &mut [(Vec<u8>, PathBuf)],
    build_invalidation_key: &str,
) -> Result<String> {
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = ShortHasher::new();
    for (rel, full) in files.iter() {
        let content = fs.read(full)?;
        hasher.field(rel).field(&content);
    }
    hasher.str_field(build_invalidation_key);
    Ok(hasher.finish())
}

/// Parent indexes: dependencies that resolve to another package of the repo.
fn dependency_parents(packages: &[PackageInfo]) -> Vec<Vec<usize>> {
    let by_name: HashMap<&str, usize> = packages
        .iter()
        .enumerate()
        .map(|(i, p)| (p.package_json.name.as_str(), i))
        .collect();

    packages
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let mut parents: Vec<usize> = p
                .package_json
                .dependency_names()
                .filter_map(|name| by_name.get(name).copied())
                .filter(|parent| *parent != index)
                .collect();
            parents.sort_unstable();
            parents.dedup();
            parents
        })
        .collect()
}
