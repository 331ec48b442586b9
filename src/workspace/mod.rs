// src/workspace/mod.rs

//! Monorepo discovery: which packages exist and which files are tracked.
//!
//! - [`package`] holds the `package.json` model and the hashed [`Artifact`].
//! - [`tracked`] lists version-controlled files (`git ls-files`).
//! - [`patterns`] compiles include/exclude globs over repo-relative paths.
//! - [`discover`] turns tracked `package.json` files into [`PackageInfo`]s.
//!
//! Nothing here computes hashes; see [`crate::hash`].

pub mod discover;
pub mod package;
pub mod path_utils;
pub mod patterns;
pub mod tracked;

pub use discover::discover_packages;
pub use package::{Artifact, PackageInfo, PackageJson};
pub use patterns::PathMatcher;
pub use tracked::{GitTrackedFiles, StaticTrackedFiles, TrackedFiles};
