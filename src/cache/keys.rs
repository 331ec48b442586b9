// src/cache/keys.rs

/// Key of a step's result for one artifact content hash.
pub fn artifact_result_key(step_id: &str, artifact_hash: &str) -> String {
    format!("{step_id}-{artifact_hash}")
}

/// Key of a whole-step (root level) result for one repo content hash.
pub fn step_result_key(repo_hash: &str, step_id: &str) -> String {
    format!("{repo_hash}-{step_id}")
}
