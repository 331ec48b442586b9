// src/cache/tiered.rs

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::cache::ImmutableCache;
use crate::cache::memory::MemoryCache;
use crate::errors::Result;

/// In-process tier in front of a remote store.
///
/// The remote tier is the source of truth. The local tier only ever holds
/// values that the remote tier holds too: it is filled on remote hits and on
/// successful remote writes, never on a write the remote side refused.
#[derive(Debug)]
pub struct TieredCache {
    local: MemoryCache,
    remote: Arc<dyn ImmutableCache>,
    local_ttl: Duration,
}

impl TieredCache {
    pub fn new(remote: Arc<dyn ImmutableCache>, local_ttl: Duration) -> Self {
        Self {
            local: MemoryCache::new(),
            remote,
            local_ttl,
        }
    }
}

impl ImmutableCache for TieredCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            if let Some(value) = self.local.get(key).await? {
                return Ok(Some(value));
            }

            let value = self.remote.get(key).await?;
            if let Some(v) = &value {
                debug!(key = %key, "remote cache hit; filling local tier");
                self.local
                    .set_if_absent(key, v.clone(), self.local_ttl)
                    .await?;
            }
            Ok(value)
        })
    }

    fn has<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if self.local.has(key).await? {
                return Ok(true);
            }
            self.remote.has(key).await
        })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let written = self.remote.set_if_absent(key, value.clone(), ttl).await?;
            if written {
                self.local
                    .set_if_absent(key, value, ttl.min(self.local_ttl))
                    .await?;
            }
            Ok(written)
        })
    }
}
