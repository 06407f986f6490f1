//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::Args;
use keel_core::{KeelConfig, ProviderKind};

/// Flags shared by every subcommand. Each one overrides the matching field
/// of the TOML file, which in turn overrides the built-in defaults.
#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rack name; labels every container started.
    #[arg(long, env = "NAME")]
    pub name: Option<String>,

    /// Directory for the metadata database and objects.
    #[arg(long, env = "PROVIDER_ROOT")]
    pub root: Option<PathBuf>,

    /// Router address, or `none` to skip registration.
    #[arg(long, env = "PROVIDER_ROUTER")]
    pub router: Option<String>,

    /// Version reported to the router.
    #[arg(long, env = "VERSION")]
    pub version: Option<String>,

    /// Provider backend: `local` or `memory`.
    #[arg(long, env = "PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Image used for build workers.
    #[arg(long, env = "KEEL_IMAGE")]
    pub image: Option<String>,

    /// URL build workers call back on.
    #[arg(long, env = "RACK_URL")]
    pub rack_url: Option<String>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> anyhow::Result<KeelConfig> {
        let mut config = match &self.config {
            Some(path) => KeelConfig::from_file(path)?,
            None => KeelConfig::default(),
        };

        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(router) = &self.router {
            config.router = router.clone();
        }
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(image) = &self.image {
            config.image = image.clone();
        }
        if let Some(rack_url) = &self.rack_url {
            config.rack_url = rack_url.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_flags() {
        let config = ConfigArgs::default().resolve().unwrap();
        assert_eq!(config, KeelConfig::default());
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"staging\"\nrouter = \"none\"\nversion = \"20250101\"").unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            version: Some("20250202".to_string()),
            provider: Some(ProviderKind::Memory),
            ..Default::default()
        };
        let config = args.resolve().unwrap();

        assert_eq!(config.name, "staging");
        assert_eq!(config.router, "none");
        assert_eq!(config.version, "20250202");
        assert_eq!(config.provider, ProviderKind::Memory);
        assert_eq!(config.root, PathBuf::from("/var/keel"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/keel.toml")),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
