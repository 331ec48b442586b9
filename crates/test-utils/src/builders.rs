#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use monoflow::config::{ConfigFile, ConfigSection, RawConfigFile, RunOnConfig, StepConfig};
use monoflow::dag::Graph;
use monoflow::fs::mock::MockFileSystem;
use monoflow::hash::{HashedRepo, compute_hashes};
use monoflow::steps::{StepDefinition, StepInfo, build_steps_graph};
use monoflow::workspace::{StaticTrackedFiles, discover_packages};

pub const REPO_ROOT: &str = "/repo";

/// Builder for an in-memory monorepo.
///
/// Every file added is also tracked. The file system handle is shared, so
/// tests can edit content between two hashing passes.
#[derive(Debug, Clone)]
pub struct RepoBuilder {
    root: PathBuf,
    fs: MockFileSystem,
    tracked: Vec<PathBuf>,
    patterns: Vec<String>,
}

impl RepoBuilder {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(REPO_ROOT),
            fs: MockFileSystem::new(),
            tracked: Vec::new(),
            patterns: vec!["packages/*".to_string()],
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fs(&self) -> MockFileSystem {
        self.fs.clone()
    }

    pub fn tracked(&self) -> StaticTrackedFiles {
        StaticTrackedFiles::new(self.tracked.clone())
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.tracked.clone()
    }

    pub fn file(mut self, rel: &str, content: &str) -> Self {
        self.fs.add_file(self.root.join(rel), content);
        self.tracked.push(PathBuf::from(rel));
        self
    }

    /// Add `packages/<name>/package.json` with a `test` script, depending on
    /// `deps`, plus one source file.
    pub fn package(self, name: &str, deps: &[&str]) -> Self {
        self.package_with_scripts(name, deps, &["test"])
    }

    pub fn package_with_scripts(self, name: &str, deps: &[&str], scripts: &[&str]) -> Self {
        let dependencies: serde_json::Map<String, serde_json::Value> = deps
            .iter()
            .map(|d| (d.to_string(), serde_json::Value::String("*".to_string())))
            .collect();
        let scripts: serde_json::Map<String, serde_json::Value> = scripts
            .iter()
            .map(|s| (s.to_string(), serde_json::Value::String(format!("echo {s}"))))
            .collect();
        let manifest = serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "scripts": scripts,
            "dependencies": dependencies,
        });

        self.file(
            &format!("packages/{name}/package.json"),
            &manifest.to_string(),
        )
        .file(
            &format!("packages/{name}/src/index.js"),
            &format!("module.exports = '{name}';"),
        )
    }

    /// Overwrite a file that is already tracked.
    pub fn set_file(&self, rel: &str, content: &str) {
        self.fs.add_file(self.root.join(rel), content);
    }

    /// Discover and hash with the default build invalidation key.
    pub fn hash(&self) -> HashedRepo {
        self.hash_with_key("1")
    }

    pub fn hash_with_key(&self, build_invalidation_key: &str) -> HashedRepo {
        let packages = discover_packages(&self.fs, &self.root, &self.tracked, &self.patterns)
            .expect("package discovery failed");
        compute_hashes(
            &self.fs,
            &self.root,
            packages,
            &self.tracked,
            build_invalidation_key,
        )
        .expect("hashing failed")
    }
}

impl Default for RepoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Step graph from `(name, parent indexes)` pairs.
pub fn steps_graph(steps: &[(&str, &[usize])]) -> Graph<StepInfo> {
    let definitions = steps
        .iter()
        .map(|(name, parents)| {
            let mut def = StepDefinition::new(*name);
            def.parents = parents.to_vec();
            def
        })
        .collect();
    build_steps_graph(definitions).expect("invalid step graph")
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                step: BTreeMap::new(),
            },
        }
    }

    pub fn with_step(mut self, key: &str, step: StepConfig) -> Self {
        self.config.step.insert(key.to_string(), step);
        self
    }

    pub fn with_packages(mut self, pattern: &str) -> Self {
        self.config.config.packages = vec![pattern.to_string()];
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StepConfig`.
pub struct StepConfigBuilder {
    step: StepConfig,
}

impl StepConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            step: StepConfig {
                cmd: cmd.to_string(),
                name: None,
                group: None,
                display_name: None,
                after: vec![],
                run_on: RunOnConfig::Artifact,
                enabled: true,
                required_script: None,
                include: vec![],
                exclude: vec![],
                skip_if_passed_in_cache: true,
                require_passed: vec![],
                concurrency: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.after.push(dep.to_string());
        self
    }

    pub fn require_passed(mut self, dep: &str) -> Self {
        self.step.require_passed.push(dep.to_string());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.step.name = Some(name.to_string());
        self
    }

    pub fn run_on_root(mut self) -> Self {
        self.step.run_on = RunOnConfig::Root;
        self
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.step.include.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.step.exclude.push(pattern.to_string());
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.step.concurrency = Some(limit);
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}
