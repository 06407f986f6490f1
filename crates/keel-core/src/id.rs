//! Resource identifier generation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the random suffix on every generated identifier.
pub const ID_SUFFIX_LEN: usize = 10;

/// Prefix for build identifiers.
pub const BUILD_PREFIX: &str = "B";
/// Prefix for release identifiers.
pub const RELEASE_PREFIX: &str = "R";
/// Prefix for table row identifiers.
pub const ROW_PREFIX: &str = "T";

/// Generate `prefix` followed by `len` random ASCII alphanumerics.
pub fn generate_id(prefix: &str, len: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}
