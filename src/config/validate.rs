// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{MonoflowError, Result};
use crate::workspace::patterns::build_globset;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MonoflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.step))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_steps(cfg)?;
    validate_global_config(cfg)?;
    validate_step_references(cfg)?;
    validate_globs(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_steps(cfg: &RawConfigFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(MonoflowError::ConfigError(
            "config must contain at least one [step.<key>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.packages.is_empty() {
        return Err(MonoflowError::ConfigError(
            "[config].packages must list at least one glob".to_string(),
        ));
    }
    if cfg.config.cache_ttl_secs == 0 {
        return Err(MonoflowError::ConfigError(
            "[config].cache_ttl_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_step_references(cfg: &RawConfigFile) -> Result<()> {
    for (key, step) in cfg.step.iter() {
        if step.cmd.trim().is_empty() {
            return Err(MonoflowError::ConfigError(format!(
                "step '{key}' has an empty `cmd`"
            )));
        }
        if step.concurrency == Some(0) {
            return Err(MonoflowError::ConfigError(format!(
                "step '{key}' has `concurrency = 0`; use at least 1 or leave it unset"
            )));
        }

        for (field, refs) in [("after", &step.after), ("require_passed", &step.require_passed)] {
            for dep in refs {
                if !cfg.step.contains_key(dep) {
                    return Err(MonoflowError::ConfigError(format!(
                        "step '{key}' has unknown step '{dep}' in `{field}`"
                    )));
                }
                if dep == key {
                    return Err(MonoflowError::ConfigError(format!(
                        "step '{key}' cannot reference itself in `{field}`"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_globs(cfg: &RawConfigFile) -> Result<()> {
    build_globset(&cfg.config.packages)
        .map_err(|e| MonoflowError::ConfigError(format!("[config].packages: {e:#}")))?;

    for (key, step) in cfg.step.iter() {
        build_globset(&step.include)
            .map_err(|e| MonoflowError::ConfigError(format!("step '{key}' include: {e:#}")))?;
        build_globset(&step.exclude)
            .map_err(|e| MonoflowError::ConfigError(format!("step '{key}' exclude: {e:#}")))?;
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> step.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for key in cfg.step.keys() {
        graph.add_node(key.as_str());
    }

    for (key, step) in cfg.step.iter() {
        for dep in step.after.iter() {
            graph.add_edge(dep.as_str(), key.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(MonoflowError::DagCycle(format!(
            "cycle detected in step graph involving step '{}'",
            cycle.node_id()
        ))),
    }
}
