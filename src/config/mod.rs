// src/config/mod.rs

//! Configuration loading and validation for monoflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, globs and the step graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{CacheKind, ConfigFile, ConfigSection, RawConfigFile, RunOnConfig, StepConfig};
