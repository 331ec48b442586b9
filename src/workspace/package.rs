// src/workspace/package.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The subset of `package.json` the engine cares about.
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub scripts: BTreeMap<String, String>,

    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, String>,
}

impl PackageJson {
    /// Names from `dependencies`, `devDependencies` and `peerDependencies`.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .keys()
            .chain(self.dev_dependencies.keys())
            .chain(self.peer_dependencies.keys())
            .map(|s| s.as_str())
    }

    pub fn has_script(&self, script: &str) -> bool {
        self.scripts.contains_key(script)
    }
}

/// A monorepo package as produced by workspace discovery, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Absolute package directory.
    pub package_path: PathBuf,
    pub package_json: PackageJson,
}

/// A hashed package. Immutable for the rest of the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub package_path: PathBuf,
    /// Package directory relative to the repo root.
    pub relative_package_path: PathBuf,
    pub package_json: PackageJson,
    /// Hash of the package's own files and the build invalidation key.
    pub isolated_hash: String,
    /// Combined content hash: own files, root files and every dependency.
    pub package_hash: String,
}

impl Artifact {
    pub fn name(&self) -> &str {
        &self.package_json.name
    }
}
