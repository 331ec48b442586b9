// src/workspace/tracked.rs

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::errors::{MonoflowError, Result};

/// Source of the version-controlled file list for the current commit.
pub trait TrackedFiles: Send + Sync + Debug {
    /// Repo-relative paths of every tracked file.
    fn list(&self, repo_path: &Path) -> Result<Vec<PathBuf>>;
}

/// Lists files with `git ls-files -z`.
#[derive(Debug, Clone, Default)]
pub struct GitTrackedFiles;

impl TrackedFiles for GitTrackedFiles {
    fn list(&self, repo_path: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new("git")
            .args(["ls-files", "-z"])
            .current_dir(repo_path)
            .output()
            .map_err(|e| MonoflowError::Vcs(format!("failed to run git ls-files: {e}")))?;

        if !output.status.success() {
            return Err(MonoflowError::Vcs(format!(
                "git ls-files failed in {:?}: {}",
                repo_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let files: Vec<PathBuf> = output
            .stdout
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .map(path_from_git_bytes)
            .collect::<Result<_>>()?;

        debug!(count = files.len(), "listed tracked files");
        Ok(files)
    }
}

/// Git emits raw path bytes with `-z`. They are kept as-is on unix so every
/// tracked file stays readable; elsewhere a non UTF-8 name is an error.
#[cfg(unix)]
fn path_from_git_bytes(entry: &[u8]) -> Result<PathBuf> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    Ok(PathBuf::from(OsString::from_vec(entry.to_vec())))
}

#[cfg(not(unix))]
fn path_from_git_bytes(entry: &[u8]) -> Result<PathBuf> {
    std::str::from_utf8(entry).map(PathBuf::from).map_err(|_| {
        MonoflowError::Vcs(format!(
            "tracked path is not valid UTF-8: {:?}",
            String::from_utf8_lossy(entry)
        ))
    })
}

/// Fixed file list, for callers that already know the tracked set.
#[derive(Debug, Clone, Default)]
pub struct StaticTrackedFiles {
    files: Vec<PathBuf>,
}

impl StaticTrackedFiles {
    pub fn new<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

impl TrackedFiles for StaticTrackedFiles {
    fn list(&self, _repo_path: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.files.clone())
    }
}
