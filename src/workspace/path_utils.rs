// src/workspace/path_utils.rs

//! Utility functions for repo-relative path handling.

use std::path::Path;

/// Render a relative path with forward slashes, for glob matching and keys.
pub fn unix_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Stable byte key for a relative path.
///
/// Same bytes as [`unix_str`] for UTF-8 paths; other names keep their raw
/// encoding so two distinct names never share a key.
pub fn path_key(path: &Path) -> Vec<u8> {
    match path.to_str() {
        Some(s) => s.replace('\\', "/").into_bytes(),
        None => path.as_os_str().as_encoded_bytes().to_vec(),
    }
}
