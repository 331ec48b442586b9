// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Configuration exactly as read from the TOML file, before validation.
///
/// ```toml
/// [config]
/// packages = ["packages/*"]
/// cache = "file"
///
/// [step.build]
/// cmd = "npm run build"
/// required_script = "build"
///
/// [step.test]
/// cmd = "npm test"
/// after = ["build"]
/// require_passed = ["build"]
/// ```
///
/// Use [`ConfigFile`] (via `TryFrom`) everywhere else.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All steps from `[step.<key>]`, keyed by step key.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// Validated configuration: step references resolve, the step graph is
/// acyclic and every glob compiles.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub step: BTreeMap<String, StepConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, step: BTreeMap<String, StepConfig>) -> Self {
        Self { config, step }
    }

    /// Step keys in declaration-independent, deterministic order. The
    /// position of a key is its step index.
    pub fn step_keys(&self) -> Vec<&str> {
        self.step.keys().map(|k| k.as_str()).collect()
    }
}

/// Which backend stores results between flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// In-process only; every flow starts cold.
    Memory,
    /// JSON document under `cache_dir`.
    File,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Globs (relative to the repo root) selecting package directories.
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    #[serde(default = "default_cache")]
    pub cache: CacheKind,

    /// Relative paths resolve against the repo root.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Bump to invalidate every cached result without touching sources.
    #[serde(default = "default_build_invalidation_key")]
    pub build_invalidation_key: String,
}

fn default_packages() -> Vec<String> {
    vec!["packages/*".to_string()]
}

fn default_cache() -> CacheKind {
    CacheKind::File
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".monoflow/cache")
}

fn default_cache_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_build_invalidation_key() -> String {
    "1".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            cache: default_cache(),
            cache_dir: default_cache_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            build_invalidation_key: default_build_invalidation_key(),
        }
    }
}

/// Where a command step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOnConfig {
    /// Once per package, in the package directory.
    #[default]
    Artifact,
    /// Once per flow, at the repo root.
    Root,
}

/// `[step.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Logical step name; defaults to the key.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Keys of the steps this one waits for.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub run_on: RunOnConfig,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Packages without this `package.json` script are skipped.
    #[serde(default)]
    pub required_script: Option<String>,

    /// Globs over package paths relative to the repo root.
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Skip packages whose current hash already passed this step.
    #[serde(default = "default_true")]
    pub skip_if_passed_in_cache: bool,

    /// Keys of steps that must have passed on the same package hash.
    #[serde(default)]
    pub require_passed: Vec<String>,

    /// Max packages processed at once; unlimited when unset.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl StepConfig {
    pub fn step_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}
