// src/hash/mod.rs

//! Content addressing of monorepo packages.
//!
//! Each package gets an isolated hash over its own tracked files, then a
//! combined hash that also covers root files and the combined hashes of its
//! parents, so any change in a (transitive) dependency changes it too.

pub mod artifacts;
pub mod digest;

pub use artifacts::{HashedRepo, compute_hashes};
pub use digest::{HASH_LENGTH, ShortHasher, short_hash};
