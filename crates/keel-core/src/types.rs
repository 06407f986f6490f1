//! Resource records shared across Keel crates.
//!
//! Every record is JSON-serialized into the metadata store, so field names
//! here are also the persisted schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A readable byte stream handed across crate boundaries (logs, objects).
pub type ByteStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Environment variables, ordered for stable serialization.
pub type Environment = BTreeMap<String, String>;

/// One table row: a flat string-to-string record.
pub type Attributes = BTreeMap<String, String>;

/// Build status assigned at creation.
pub const BUILD_CREATED: &str = "created";

// ── App ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub name: String,
    pub status: String,
}

// ── Build ─────────────────────────────────────────────────────────

/// One attempt to turn a source location into a deployable artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Build {
    pub id: String,
    pub app: String,
    /// Process handle of the build worker.
    pub process: String,
    #[serde(default)]
    pub manifest: String,
    /// Release produced by this build, once known.
    #[serde(default)]
    pub release: String,
    /// Free-form; `created`, `running`, `complete`, `failed` by convention.
    pub status: String,
    /// Launch time of the worker, from [`sortable_time`].
    pub started: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildCreateOptions {
    /// Manifest path inside the source, passed through to the worker.
    pub manifest: String,
}

/// Partial build update. Empty fields mean "not specified".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildUpdateOptions {
    pub manifest: String,
    pub release: String,
    pub status: String,
}

// ── Release ───────────────────────────────────────────────────────

/// An immutable pairing of a build with environment and manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: String,
    pub app: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub env: Environment,
    #[serde(default)]
    pub manifest: String,
    /// Creation time, from [`sortable_time`].
    pub created: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseCreateOptions {
    pub build: String,
    pub env: Environment,
    pub manifest: String,
}

// ── Process ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Process {
    pub id: String,
    pub app: String,
    pub service: String,
    #[serde(default)]
    pub release: String,
    pub status: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    pub started: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessListOptions {
    /// Only return processes of this service when set.
    pub service: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessRunOptions {
    pub service: String,
    pub release: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Environment,
    /// `host:container` bind mounts.
    pub mounts: Vec<String>,
}

// ── Objects ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectStoreOptions {
    pub public: bool,
}

/// Descriptor returned after storing an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the stored bytes.
    pub checksum: String,
    #[serde(default)]
    pub public: bool,
}

// ── System ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct System {
    pub name: String,
    pub version: String,
    pub status: String,
}

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Unix time in nanoseconds, strictly increasing within this process.
///
/// Listings sort newest first on this value, so records created within one
/// clock tick still come back in creation order.
pub fn sortable_time() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}
