//! keel-provider: the resource manager behind the Keel API.
//!
//! [`Provider`] is the uniform interface over apps, builds, releases,
//! processes, objects and table rows. [`LocalProvider`] implements it on a
//! single host: records live in a [`keel_state::MetadataStore`], objects in a
//! [`keel_state::ObjectStore`], and builds and processes run through a
//! [`keel_container::ContainerRuntime`].
//!
//! Construct one with [`from_config`], which also performs router
//! registration.

pub mod error;
pub mod local;
pub mod provider;
pub mod proxy;
pub mod registration;

use std::sync::Arc;

use keel_container::{ContainerRuntime, DockerRuntime};
use keel_core::{KeelConfig, ProviderKind};
use tracing::info;

pub use error::{ProviderError, ProviderResult};
pub use local::LocalProvider;
pub use provider::{Provider, ShutdownReport};
pub use proxy::{Proxy, ProxyStream};
pub use registration::Registration;

/// Build the provider selected by `config.provider`, driving the local
/// docker engine.
pub async fn from_config(config: &KeelConfig) -> ProviderResult<Arc<dyn Provider>> {
    from_config_with_runtime(config, Arc::new(DockerRuntime::new())).await
}

/// Like [`from_config`] with a caller-supplied container runtime.
///
/// Router registration runs before the provider is returned; its failure
/// aborts construction.
pub async fn from_config_with_runtime(
    config: &KeelConfig,
    runtime: Arc<dyn ContainerRuntime>,
) -> ProviderResult<Arc<dyn Provider>> {
    let provider = match config.provider {
        ProviderKind::Local => LocalProvider::open(config, runtime)?,
        ProviderKind::Memory => LocalProvider::in_memory(config, runtime)?,
    };
    let registration = provider.init().await?;
    info!(
        provider = %config.provider,
        rack = %config.name,
        registration = ?registration,
        "provider ready"
    );
    Ok(Arc::new(provider))
}
