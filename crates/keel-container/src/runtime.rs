//! The container runtime trait and the types that cross it.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use keel_core::ByteStream;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;

use crate::error::{ContainerError, ContainerResult};

/// Length of the process handle used across the control plane
/// (logs, stop, proxy, records).
pub const PROCESS_ID_LEN: usize = 10;

/// Everything needed to launch one detached process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    /// Overrides the image entrypoint command when set.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `host:container` bind mounts.
    pub mounts: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl RunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn mount(mut self, mount: impl Into<String>) -> Self {
        self.mounts.push(mount.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Cut a runtime-supplied id down to the fixed-length process handle.
///
/// Ids shorter than [`PROCESS_ID_LEN`] are rejected rather than used as-is.
pub fn process_handle(raw: &str) -> ContainerResult<String> {
    let raw = raw.trim();
    raw.get(..PROCESS_ID_LEN)
        .map(str::to_string)
        .ok_or_else(|| ContainerError::InvalidProcessId {
            id: raw.to_string(),
            min: PROCESS_ID_LEN,
        })
}

/// A followed log stream.
///
/// Reads yield process output until the process exits. When the bytes are
/// produced by a background forwarding task, [`LogStream::finished`] joins it
/// and reports how many bytes were forwarded or why forwarding stopped.
pub struct LogStream {
    inner: ByteStream,
    task: Option<JoinHandle<std::io::Result<u64>>>,
}

impl LogStream {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(reader),
            task: None,
        }
    }

    pub fn with_task(
        reader: impl AsyncRead + Send + Unpin + 'static,
        task: JoinHandle<std::io::Result<u64>>,
    ) -> Self {
        Self {
            inner: Box::new(reader),
            task: Some(task),
        }
    }

    /// Stop reading and wait for the forwarding task to end.
    pub async fn finished(self) -> std::io::Result<u64> {
        let Self { inner, task } = self;
        drop(inner);
        match task {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => Ok(0),
        }
    }
}

impl AsyncRead for LogStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Minimal contract every execution engine must satisfy.
///
/// Ids returned by `run` and `list_by_labels` are the engine's own; callers
/// cut them with [`process_handle`]. Every other method accepts either a
/// full id or a handle.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Launch a detached process and return its id.
    async fn run(&self, spec: &RunSpec) -> ContainerResult<String>;

    /// Follow the process's combined output until it exits.
    async fn logs(&self, id: &str) -> ContainerResult<LogStream>;

    /// Stop the process.
    async fn stop(&self, id: &str) -> ContainerResult<()>;

    /// Ids of running processes carrying every given label.
    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> ContainerResult<Vec<String>>;

    /// Host or IP at which the process's exposed ports are reachable.
    async fn address(&self, id: &str) -> ContainerResult<String>;

    /// Unpack a tar archive into the process's filesystem, rooted at `/`.
    async fn copy_into(&self, id: &str, archive: ByteStream) -> ContainerResult<()>;

    /// Remove files from the process's filesystem. Missing paths are ignored.
    async fn remove_files(&self, id: &str, paths: &[String]) -> ContainerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn handle_cuts_long_ids() {
        let id = "4f1c2a9e7b3d5f60112233445566778899aabbccddeeff";
        assert_eq!(process_handle(id).unwrap(), "4f1c2a9e7b");
        assert_eq!(process_handle("4f1c2a9e7b\n").unwrap(), "4f1c2a9e7b");
    }

    #[test]
    fn handle_rejects_short_ids() {
        let err = process_handle("abc123").unwrap_err();
        assert!(matches!(
            err,
            ContainerError::InvalidProcessId { ref id, min: PROCESS_ID_LEN } if id == "abc123"
        ));
    }

    #[test]
    fn run_spec_builder() {
        let spec = RunSpec::new("keel/keel")
            .command("build")
            .arg("-id")
            .arg("B123")
            .env("BUILD_APP", "web")
            .mount("/var/run/docker.sock:/var/run/docker.sock")
            .label("keel.rack", "keel");

        assert_eq!(spec.command.as_deref(), Some("build"));
        assert_eq!(spec.args, vec!["-id", "B123"]);
        assert_eq!(spec.env["BUILD_APP"], "web");
        assert_eq!(spec.labels["keel.rack"], "keel");
    }

    #[tokio::test]
    async fn log_stream_reads_and_finishes() {
        let (reader, mut writer) = tokio::io::duplex(64);
        let task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"step 1\nstep 2\n").await?;
            Ok::<u64, std::io::Error>(14)
        });
        let mut stream = LogStream::with_task(reader, task);

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "step 1\nstep 2\n");
        assert_eq!(stream.finished().await.unwrap(), 14);
    }
}
