// src/workspace/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/exclude glob patterns over repo-relative paths.
///
/// An empty include list matches everything.
#[derive(Clone)]
pub struct PathMatcher {
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    patterns: Vec<String>,
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMatcher")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl PathMatcher {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include_set = if include.is_empty() {
            None
        } else {
            Some(build_globset(include).context("building include globset")?)
        };

        let exclude_set = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).context("building exclude globset")?)
        };

        let mut patterns = include.to_vec();
        patterns.extend(exclude.iter().map(|p| format!("!{p}")));

        Ok(Self {
            include_set,
            exclude_set,
            patterns,
        })
    }

    /// Matcher that accepts every path.
    pub fn any() -> Self {
        Self {
            include_set: None,
            exclude_set: None,
            patterns: Vec::new(),
        }
    }

    /// Returns true if `rel_path` (forward slashes, e.g. `"packages/a"`) is
    /// included and not excluded.
    pub fn matches(&self, rel_path: &str) -> bool {
        if let Some(include) = &self.include_set {
            if !include.is_match(rel_path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude_set {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }
}

/// Build a GlobSet from simple string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
