// src/cache/results.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ImmutableCache;
use crate::cache::keys::{artifact_result_key, step_result_key};
use crate::errors::{MonoflowError, Result};
use crate::status::StepResult;

/// A terminal result as persisted, tagged with the flow that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub flow_id: String,
    pub result: StepResult,
}

/// Typed access to the engine's entries in an [`ImmutableCache`].
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<dyn ImmutableCache>,
    ttl: Duration,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("inner", &self.inner)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResultCache {
    pub fn new(inner: Arc<dyn ImmutableCache>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    pub async fn artifact_result(
        &self,
        step_id: &str,
        artifact_hash: &str,
    ) -> Result<Option<CachedResult>> {
        self.read(&artifact_result_key(step_id, artifact_hash)).await
    }

    pub async fn step_result(&self, repo_hash: &str, step_id: &str) -> Result<Option<CachedResult>> {
        self.read(&step_result_key(repo_hash, step_id)).await
    }

    /// Record a cell result. Never overwrites an existing entry.
    pub async fn record_artifact_result(
        &self,
        step_id: &str,
        artifact_hash: &str,
        flow_id: &str,
        result: &StepResult,
    ) -> Result<bool> {
        self.write(&artifact_result_key(step_id, artifact_hash), flow_id, result)
            .await
    }

    /// Record a whole-step result. Never overwrites an existing entry.
    pub async fn record_step_result(
        &self,
        repo_hash: &str,
        step_id: &str,
        flow_id: &str,
        result: &StepResult,
    ) -> Result<bool> {
        self.write(&step_result_key(repo_hash, step_id), flow_id, result)
            .await
    }

    async fn read(&self, key: &str) -> Result<Option<CachedResult>> {
        match self.inner.get(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                MonoflowError::Cache(format!("undecodable cache value at '{key}': {e}"))
            }),
        }
    }

    async fn write(&self, key: &str, flow_id: &str, result: &StepResult) -> Result<bool> {
        if !result.is_terminal() {
            return Err(MonoflowError::InvariantViolation(format!(
                "refusing to cache non-terminal result at '{key}'"
            )));
        }

        let value = serde_json::to_string(&CachedResult {
            flow_id: flow_id.to_string(),
            result: result.clone(),
        })?;
        let written = self.inner.set_if_absent(key, value, self.ttl).await?;
        debug!(key = %key, written, "recorded result in cache");
        Ok(written)
    }
}
