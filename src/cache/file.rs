// src/cache/file.rs

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::ImmutableCache;
use crate::errors::{MonoflowError, Result};

/// File name of the cache document inside the cache directory.
///
/// The effective path on disk is `<cache_dir>/results.json`.
pub const CACHE_FILE_NAME: &str = "results.json";

/// Advisory lock file next to the document, held while writing.
pub const LOCK_FILE_NAME: &str = "results.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    /// Seconds since the Unix epoch; `None` never expires.
    #[serde(default)]
    expires_at: Option<u64>,
}

impl FileEntry {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Stores results in a JSON file (`<cache_dir>/results.json`).
///
/// Writers take an exclusive `fs2` lock on `results.lock`, so processes
/// sharing a cache directory are serialised too. Each set-if-absent re-reads
/// the document under that lock, so a value written earlier always wins.
/// Readers rely on the atomic rename and never lock.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    lock_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(CACHE_FILE_NAME),
            lock_path: cache_dir.as_ref().join(LOCK_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_all(&self) -> Result<BTreeMap<String, FileEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                MonoflowError::Cache(format!("corrupt cache file {:?}: {}", self.path, e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_all(&self, map: &BTreeMap<String, FileEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling file first so a crash never leaves half a document.
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(map)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Block (off the runtime) until this handle owns the cache lock file.
    /// The lock is released when the returned file is dropped.
    async fn lock_document(&self) -> Result<File> {
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || -> Result<File> {
            if let Some(parent) = lock_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| MonoflowError::Cache(format!("waiting for cache lock: {e}")))?
    }

    async fn get_live(&self, key: &str) -> Result<Option<String>> {
        let map = self.load_all().await?;
        Ok(map
            .get(key)
            .filter(|e| e.is_live(unix_now()))
            .map(|e| e.value.clone()))
    }
}

impl ImmutableCache for FileCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.get_live(key))
    }

    fn has<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.get_live(key).await?.is_some()) })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let _lock = self.lock_document().await?;
            let now = unix_now();
            let mut map = self.load_all().await?;

            if map.get(key).is_some_and(|e| e.is_live(now)) {
                debug!(key = %key, "cache key already present; keeping first value (file)");
                return Ok(false);
            }

            // Drop expired entries while the document is in hand.
            let before = map.len();
            map.retain(|_, e| e.is_live(now));
            if map.len() < before {
                info!(removed = before - map.len(), "pruned expired cache entries (file)");
            }

            map.insert(
                key.to_string(),
                FileEntry {
                    value,
                    expires_at: now.checked_add(ttl.as_secs()),
                },
            );
            self.save_all(&map).await?;
            debug!(key = %key, path = ?self.path, "stored cache entry (file)");
            Ok(true)
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
