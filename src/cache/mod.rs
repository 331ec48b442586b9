// src/cache/mod.rs

//! Immutable result cache.
//!
//! The engine only ever reads, checks, and writes-if-absent: a value, once
//! recorded for a key, is authoritative for as long as it lives. Nothing in
//! the crate updates or deletes an entry.
//!
//! - [`memory`]: in-process store with TTL.
//! - [`file`]: JSON document under the cache directory, survives restarts.
//! - [`tiered`]: local tier in front of a remote source of truth.
//! - [`results`]: typed facade storing [`crate::status::StepResult`]s under
//!   the engine's keys.

use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::errors::Result;

pub mod file;
pub mod keys;
pub mod memory;
pub mod results;
pub mod tiered;

pub use file::FileCache;
pub use keys::{artifact_result_key, step_result_key};
pub use memory::MemoryCache;
pub use results::{CachedResult, ResultCache};
pub use tiered::TieredCache;

/// Durable key-value store with set-if-absent writes.
pub trait ImmutableCache: Send + Sync + Debug {
    /// Value for `key`, or `None` if it was never written (or expired).
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn has<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Store `value` unless `key` already holds one.
    ///
    /// Returns `true` if this call wrote the value.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<bool>>;
}
