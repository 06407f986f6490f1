//! The `Provider` abstraction every backend implements.

use async_trait::async_trait;
use keel_container::LogStream;
use keel_core::{
    App, Attributes, Build, BuildCreateOptions, BuildUpdateOptions, ByteStream, ObjectInfo,
    ObjectStoreOptions, Process, ProcessListOptions, ProcessRunOptions, Release,
    ReleaseCreateOptions, System,
};
use serde::Serialize;

use crate::error::ProviderResult;
use crate::proxy::ProxyStream;

/// Outcome of stopping every process of the rack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Ids that stopped cleanly.
    pub stopped: Vec<String>,
    /// `(id, error)` for every stop that failed.
    pub failed: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resource manager for apps, builds, releases, processes, objects and
/// table rows.
///
/// Every app-scoped operation checks that the app exists before touching
/// anything else and fails with `NotFound` otherwise.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn system_get(&self) -> ProviderResult<System>;

    async fn app_create(&self, name: &str) -> ProviderResult<App>;
    async fn app_get(&self, name: &str) -> ProviderResult<App>;
    async fn app_delete(&self, name: &str) -> ProviderResult<()>;
    async fn app_list(&self) -> ProviderResult<Vec<App>>;

    /// Launch a build worker for `url` and return the `created` record
    /// without waiting for the build.
    async fn build_create(
        &self,
        app: &str,
        url: &str,
        opts: BuildCreateOptions,
    ) -> ProviderResult<Build>;
    async fn build_get(&self, app: &str, id: &str) -> ProviderResult<Build>;
    async fn build_list(&self, app: &str) -> ProviderResult<Vec<Build>>;
    async fn build_logs(&self, app: &str, id: &str) -> ProviderResult<LogStream>;
    /// Overwrite only the non-empty fields of `opts`.
    async fn build_update(
        &self,
        app: &str,
        id: &str,
        opts: BuildUpdateOptions,
    ) -> ProviderResult<Build>;

    async fn release_create(&self, app: &str, opts: ReleaseCreateOptions)
    -> ProviderResult<Release>;
    async fn release_get(&self, app: &str, id: &str) -> ProviderResult<Release>;
    /// Newest first.
    async fn release_list(&self, app: &str) -> ProviderResult<Vec<Release>>;

    async fn process_list(&self, app: &str, opts: ProcessListOptions)
    -> ProviderResult<Vec<Process>>;
    async fn process_run(&self, app: &str, opts: ProcessRunOptions) -> ProviderResult<Process>;
    async fn process_stop(&self, app: &str, pid: &str) -> ProviderResult<()>;

    /// Unpack a tar archive into the filesystem of a running process.
    async fn files_upload(&self, app: &str, pid: &str, archive: ByteStream) -> ProviderResult<()>;
    /// Remove files from a running process. Missing paths are not an error.
    async fn files_delete(&self, app: &str, pid: &str, files: Vec<String>) -> ProviderResult<()>;

    async fn object_fetch(&self, app: &str, key: &str) -> ProviderResult<ByteStream>;
    async fn object_store(
        &self,
        app: &str,
        key: &str,
        reader: ByteStream,
        opts: ObjectStoreOptions,
    ) -> ProviderResult<ObjectInfo>;
    async fn object_exists(&self, app: &str, key: &str) -> ProviderResult<bool>;
    async fn object_delete(&self, app: &str, key: &str) -> ProviderResult<()>;
    async fn object_list(&self, app: &str, prefix: &str) -> ProviderResult<Vec<String>>;

    async fn table_fetch(&self, app: &str, table: &str, id: &str) -> ProviderResult<Attributes>;
    /// Store a new row and return its generated id.
    async fn table_store(&self, app: &str, table: &str, attrs: Attributes)
    -> ProviderResult<String>;
    async fn table_list(&self, app: &str, table: &str) -> ProviderResult<Vec<String>>;
    async fn table_delete(&self, app: &str, table: &str, id: &str) -> ProviderResult<()>;

    /// Open a byte stream to `port` of process `pid`.
    async fn proxy_start(&self, app: &str, pid: &str, port: u16) -> ProviderResult<ProxyStream>;

    /// Stop every process belonging to this rack and wait for all of them.
    async fn shutdown(&self) -> ProviderResult<ShutdownReport>;
}
