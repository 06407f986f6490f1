//! Hierarchical key handling shared by both stores.

use crate::error::{StateError, StateResult};

/// Trim surrounding slashes and reject empty, `.` and `..` segments.
pub fn normalize_key(key: &str) -> StateResult<String> {
    let trimmed = key.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StateError::InvalidKey(key.to_string()));
    }
    if trimmed
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StateError::InvalidKey(key.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Join path segments with `/`.
pub fn join_key(parts: &[&str]) -> String {
    parts.join("/")
}

/// Prefix matching everything strictly beneath `key` (`""` for the root).
pub(crate) fn child_prefix(key: &str) -> StateResult<String> {
    if key.trim_matches('/').is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}/", normalize_key(key)?))
}
