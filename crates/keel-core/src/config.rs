//! Keel daemon configuration.
//!
//! A single `KeelConfig` is built once at process start (from a TOML file,
//! command-line flags, or both) and handed to every component by reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Router value that turns off router registration entirely.
pub const ROUTER_DISABLED: &str = "none";

/// Which backend implements the provider interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single host: docker engine plus an on-disk store under `root`.
    #[default]
    Local,
    /// Local semantics with an in-memory metadata store (tests, dry runs).
    Memory,
}

#[derive(Debug, Error)]
#[error("unknown provider kind: {0}")]
pub struct UnknownProvider(String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "local" => Ok(ProviderKind::Local),
            "memory" | "test" => Ok(ProviderKind::Memory),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeelConfig {
    /// Rack name; every container we start is labelled with it.
    pub name: String,
    /// Directory holding the metadata database and object files.
    pub root: PathBuf,
    /// Router host (`host` or `host:port`), or `none`.
    pub router: String,
    /// Version of this control plane, compared against the router's.
    pub version: String,
    /// Image used for build workers.
    pub image: String,
    /// URL build workers use to call back into the API.
    pub rack_url: String,
    pub provider: ProviderKind,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            name: "keel".to_string(),
            root: PathBuf::from("/var/keel"),
            router: "10.42.0.0".to_string(),
            version: "latest".to_string(),
            image: "keel/keel".to_string(),
            rack_url: "https://rack:3000".to_string(),
            provider: ProviderKind::Local,
        }
    }
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeelConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Whether the daemon should talk to the router at startup.
    pub fn router_enabled(&self) -> bool {
        !self.router.is_empty() && self.router != ROUTER_DISABLED
    }

    /// Path of the embedded metadata database.
    pub fn database_path(&self) -> PathBuf {
        self.root.join("keel.redb")
    }

    /// Directory under which object blobs are written.
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_router() {
        let config = KeelConfig::default();
        assert!(config.router_enabled());
        assert_eq!(config.database_path(), PathBuf::from("/var/keel/keel.redb"));
        assert_eq!(config.objects_dir(), PathBuf::from("/var/keel/objects"));
    }

    #[test]
    fn parse_partial_file_keeps_defaults() {
        let toml_str = r#"
name = "staging"
router = "none"
provider = "memory"
"#;
        let config: KeelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "staging");
        assert_eq!(config.provider, ProviderKind::Memory);
        assert_eq!(config.version, "latest");
        assert!(!config.router_enabled());
    }

    #[test]
    fn toml_round_trip() {
        let config = KeelConfig {
            version: "20240101".to_string(),
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        let parsed: KeelConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn provider_kind_from_str() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("test".parse::<ProviderKind>().unwrap(), ProviderKind::Memory);
        assert!("aws".parse::<ProviderKind>().is_err());
    }
}
