//! Single-host provider: redb metadata, filesystem objects, and a container
//! runtime for builds and processes.

mod app;
mod build;
mod files;
mod object;
mod process;
mod release;
mod shutdown;
mod table;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use keel_container::{ContainerError, ContainerRuntime, LogStream, process_handle};
use keel_core::{
    App, Attributes, Build, BuildCreateOptions, BuildUpdateOptions, ByteStream, KeelConfig,
    ObjectInfo, ObjectStoreOptions, Process, ProcessListOptions, ProcessRunOptions, Release,
    ReleaseCreateOptions, System,
};
use keel_state::{MetadataStore, ObjectStore, StateError, join_key};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ShutdownReport};
use crate::proxy::{Proxy, ProxyStream};
use crate::registration::{self, Registration};

pub const LABEL_RACK: &str = "keel.rack";
pub const LABEL_APP: &str = "keel.app";
pub const LABEL_SERVICE: &str = "keel.service";
pub const LABEL_RELEASE: &str = "keel.release";
pub const LABEL_TYPE: &str = "keel.type";

pub struct LocalProvider {
    config: KeelConfig,
    store: MetadataStore,
    objects: ObjectStore,
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Proxy,
}

impl LocalProvider {
    pub fn new(
        config: KeelConfig,
        store: MetadataStore,
        objects: ObjectStore,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            config,
            store,
            objects,
            runtime,
            proxy: Proxy::new(),
        }
    }

    /// Open the on-disk store under `config.root`.
    pub fn open(config: &KeelConfig, runtime: Arc<dyn ContainerRuntime>) -> ProviderResult<Self> {
        let store = MetadataStore::open(&config.database_path())?;
        let objects = ObjectStore::new(config.objects_dir());
        info!(
            root = %config.root.display(),
            runtime = runtime.name(),
            "local provider opened"
        );
        Ok(Self::new(config.clone(), store, objects, runtime))
    }

    /// Keep metadata in memory; objects still go under `config.root`.
    pub fn in_memory(
        config: &KeelConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> ProviderResult<Self> {
        let store = MetadataStore::open_in_memory()?;
        let objects = ObjectStore::new(config.objects_dir());
        Ok(Self::new(config.clone(), store, objects, runtime))
    }

    /// Register with the router. Failure is fatal to startup.
    pub async fn init(&self) -> ProviderResult<Registration> {
        registration::register(&self.config).await
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    fn rack_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(LABEL_RACK.to_string(), self.config.name.clone())])
    }

    fn app_labels(&self, app: &str) -> BTreeMap<String, String> {
        let mut labels = self.rack_labels();
        labels.insert(LABEL_APP.to_string(), app.to_string());
        labels
    }

    /// Fail with `NotFound` unless `app` exists.
    fn require_app(&self, app: &str) -> ProviderResult<()> {
        validate_name("app", app)?;
        if self.store.exists(&app_key(app))? {
            Ok(())
        } else {
            Err(ProviderError::not_found("app", app))
        }
    }

    /// Fail with `NotFound` unless `pid` is a process this provider ran for
    /// `app`. Returns the record key.
    fn require_process(&self, app: &str, pid: &str) -> ProviderResult<String> {
        self.require_app(app)?;
        validate_name("process", pid)?;
        let key = process_key(app, pid);
        if self.store.exists(&key)? {
            Ok(key)
        } else {
            Err(ProviderError::not_found("process", pid))
        }
    }

    /// Cut a freshly launched container id to a process handle and pass it to
    /// `record`. When either step fails the container is stopped, so nothing
    /// keeps running without a record.
    async fn track_container<T>(
        &self,
        raw: &str,
        record: impl FnOnce(String) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let result = process_handle(raw)
            .map_err(ProviderError::from)
            .and_then(record);
        if result.is_err() {
            self.discard_container(raw).await;
        }
        result
    }

    async fn discard_container(&self, raw: &str) {
        let id = raw.trim();
        if id.is_empty() {
            return;
        }
        match self.runtime.stop(id).await {
            Ok(()) => info!(%id, "stopped untracked container"),
            Err(e) => warn!(%id, error = %e, "failed to stop untracked container"),
        }
    }

    /// Load a record, naming the resource in the `NotFound` message.
    fn load_record<T: DeserializeOwned>(
        &self,
        key: &str,
        kind: &str,
        name: &str,
    ) -> ProviderResult<T> {
        match self.store.load(key) {
            Ok(value) => Ok(value),
            Err(StateError::NotFound(_)) => Err(ProviderError::not_found(kind, name)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Names used as a single key segment: apps, tables, ids.
pub(crate) fn validate_name(kind: &str, name: &str) -> ProviderResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ProviderError::Validation(format!("invalid {kind} name {name:?}")))
    }
}

pub(crate) const APPS: &str = "apps";

pub(crate) fn app_key(app: &str) -> String {
    join_key(&[APPS, app])
}

pub(crate) fn builds_key(app: &str) -> String {
    join_key(&[APPS, app, "builds"])
}

pub(crate) fn build_key(app: &str, id: &str) -> String {
    join_key(&[APPS, app, "builds", id])
}

pub(crate) fn releases_key(app: &str) -> String {
    join_key(&[APPS, app, "releases"])
}

pub(crate) fn release_key(app: &str, id: &str) -> String {
    join_key(&[APPS, app, "releases", id])
}

pub(crate) fn process_key(app: &str, pid: &str) -> String {
    join_key(&[APPS, app, "processes", pid])
}

pub(crate) fn table_key(app: &str, table: &str) -> String {
    join_key(&[APPS, app, "tables", table])
}

pub(crate) fn row_key(app: &str, table: &str, id: &str) -> String {
    join_key(&[APPS, app, "tables", table, id])
}

#[async_trait]
impl Provider for LocalProvider {
    async fn system_get(&self) -> ProviderResult<System> {
        Ok(System {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            status: "running".to_string(),
        })
    }

    async fn app_create(&self, name: &str) -> ProviderResult<App> {
        self.create_app(name)
    }

    async fn app_get(&self, name: &str) -> ProviderResult<App> {
        self.get_app(name)
    }

    async fn app_delete(&self, name: &str) -> ProviderResult<()> {
        self.delete_app(name).await
    }

    async fn app_list(&self) -> ProviderResult<Vec<App>> {
        self.list_apps()
    }

    async fn build_create(
        &self,
        app: &str,
        url: &str,
        opts: BuildCreateOptions,
    ) -> ProviderResult<Build> {
        self.create_build(app, url, opts).await
    }

    async fn build_get(&self, app: &str, id: &str) -> ProviderResult<Build> {
        self.get_build(app, id)
    }

    async fn build_list(&self, app: &str) -> ProviderResult<Vec<Build>> {
        self.list_builds(app)
    }

    async fn build_logs(&self, app: &str, id: &str) -> ProviderResult<LogStream> {
        self.build_log_stream(app, id).await
    }

    async fn build_update(
        &self,
        app: &str,
        id: &str,
        opts: BuildUpdateOptions,
    ) -> ProviderResult<Build> {
        self.update_build(app, id, opts)
    }

    async fn release_create(
        &self,
        app: &str,
        opts: ReleaseCreateOptions,
    ) -> ProviderResult<Release> {
        self.create_release(app, opts)
    }

    async fn release_get(&self, app: &str, id: &str) -> ProviderResult<Release> {
        self.get_release(app, id)
    }

    async fn release_list(&self, app: &str) -> ProviderResult<Vec<Release>> {
        self.list_releases(app)
    }

    async fn process_list(
        &self,
        app: &str,
        opts: ProcessListOptions,
    ) -> ProviderResult<Vec<Process>> {
        self.list_processes(app, opts).await
    }

    async fn process_run(&self, app: &str, opts: ProcessRunOptions) -> ProviderResult<Process> {
        self.run_process(app, opts).await
    }

    async fn process_stop(&self, app: &str, pid: &str) -> ProviderResult<()> {
        self.stop_process(app, pid).await
    }

    async fn files_upload(&self, app: &str, pid: &str, archive: ByteStream) -> ProviderResult<()> {
        self.upload_files(app, pid, archive).await
    }

    async fn files_delete(&self, app: &str, pid: &str, files: Vec<String>) -> ProviderResult<()> {
        self.delete_files(app, pid, &files).await
    }

    async fn object_fetch(&self, app: &str, key: &str) -> ProviderResult<ByteStream> {
        self.fetch_object(app, key).await
    }

    async fn object_store(
        &self,
        app: &str,
        key: &str,
        reader: ByteStream,
        opts: ObjectStoreOptions,
    ) -> ProviderResult<ObjectInfo> {
        self.store_object(app, key, reader, opts).await
    }

    async fn object_exists(&self, app: &str, key: &str) -> ProviderResult<bool> {
        self.object_present(app, key).await
    }

    async fn object_delete(&self, app: &str, key: &str) -> ProviderResult<()> {
        self.delete_object(app, key).await
    }

    async fn object_list(&self, app: &str, prefix: &str) -> ProviderResult<Vec<String>> {
        self.list_objects(app, prefix).await
    }

    async fn table_fetch(&self, app: &str, table: &str, id: &str) -> ProviderResult<Attributes> {
        self.fetch_row(app, table, id)
    }

    async fn table_store(
        &self,
        app: &str,
        table: &str,
        attrs: Attributes,
    ) -> ProviderResult<String> {
        self.store_row(app, table, attrs)
    }

    async fn table_list(&self, app: &str, table: &str) -> ProviderResult<Vec<String>> {
        self.list_rows(app, table)
    }

    async fn table_delete(&self, app: &str, table: &str, id: &str) -> ProviderResult<()> {
        self.delete_row(app, table, id)
    }

    async fn proxy_start(&self, app: &str, pid: &str, port: u16) -> ProviderResult<ProxyStream> {
        self.require_app(app)?;
        if port == 0 {
            return Err(ProviderError::Validation("proxy port must be non-zero".to_string()));
        }
        self.require_process(app, pid)?;
        let address = match self.runtime.address(pid).await {
            Ok(address) => address,
            Err(ContainerError::NotFound(_)) => {
                return Err(ProviderError::not_found("process", pid));
            }
            Err(e) => return Err(e.into()),
        };
        info!(%app, %pid, %address, port, "proxy starting");
        self.proxy.connect(&address, port).await
    }

    async fn shutdown(&self) -> ProviderResult<ShutdownReport> {
        self.stop_rack().await
    }
}
