use keel_container::ContainerError;
use keel_core::ByteStream;
use tracing::info;

use super::LocalProvider;
use crate::error::{ProviderError, ProviderResult};

impl LocalProvider {
    pub(super) async fn upload_files(
        &self,
        app: &str,
        pid: &str,
        archive: ByteStream,
    ) -> ProviderResult<()> {
        self.require_process(app, pid)?;
        self.runtime
            .copy_into(pid, archive)
            .await
            .map_err(|e| process_gone(pid, e))?;
        info!(%app, %pid, "files uploaded");
        Ok(())
    }

    pub(super) async fn delete_files(
        &self,
        app: &str,
        pid: &str,
        files: &[String],
    ) -> ProviderResult<()> {
        self.require_process(app, pid)?;
        if files.is_empty() {
            return Err(ProviderError::Validation("no files to delete".to_string()));
        }
        if files.iter().any(|f| f.trim().is_empty()) {
            return Err(ProviderError::Validation("file paths must be non-empty".to_string()));
        }
        self.runtime
            .remove_files(pid, files)
            .await
            .map_err(|e| process_gone(pid, e))?;
        info!(%app, %pid, files = files.len(), "files deleted");
        Ok(())
    }
}

/// A recorded process whose container has disappeared.
fn process_gone(pid: &str, err: ContainerError) -> ProviderError {
    match err {
        ContainerError::NotFound(_) => ProviderError::not_found("process", pid),
        other => other.into(),
    }
}
