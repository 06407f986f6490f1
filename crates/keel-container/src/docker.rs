//! Docker engine driver.
//!
//! Shells out to the `docker` CLI through `tokio::process`. Every engine
//! call is one CLI invocation; the only long-lived child is `docker logs
//! --follow`, whose stdout and stderr are merged by a forwarding task.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use keel_core::ByteStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ContainerError, ContainerResult};
use crate::runtime::{ContainerRuntime, LogStream, RunSpec};

/// Buffer between the log forwarding task and the reader.
const LOG_BUFFER: usize = 64 * 1024;

/// Template printing every network address of a container.
const ADDRESS_FORMAT: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}";

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker-compatible CLI (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run one CLI command to completion and return its trimmed stdout.
    async fn docker(&self, args: &[String]) -> ContainerResult<String> {
        let command = format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or(""));
        debug!(binary = %self.binary, args = ?args, "docker command");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like [`DockerRuntime::docker`], for commands that address one
    /// container; a missing container becomes `NotFound`.
    async fn docker_on(&self, id: &str, args: &[String]) -> ContainerResult<String> {
        self.docker(args).await.map_err(|e| missing_container(id, e))
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(&self, spec: &RunSpec) -> ContainerResult<String> {
        let id = self.docker(&run_args(spec)).await?;
        debug!(image = %spec.image, %id, "container started");
        Ok(id)
    }

    async fn logs(&self, id: &str) -> ContainerResult<LogStream> {
        // `docker logs` reports a missing container on the stream itself.
        self.docker_on(id, &inspect_args("{{.Id}}", id)).await?;

        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                command: format!("{} logs", self.binary),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (reader, mut writer) = tokio::io::duplex(LOG_BUFFER);
        let id = id.to_string();

        let task = tokio::spawn(async move {
            let result = match (stdout, stderr) {
                (Some(out), Some(err)) => merge_into(out, err, &mut writer).await,
                _ => Ok(0),
            };
            let _ = writer.shutdown().await;
            match &result {
                // Process exited and both pipes drained.
                Ok(bytes) => {
                    let _ = child.wait().await;
                    debug!(%id, bytes, "log stream ended");
                }
                // Reader went away; kill_on_drop stops `docker logs`.
                Err(e) => debug!(%id, error = %e, "log stream closed early"),
            }
            result
        });

        Ok(LogStream::with_task(reader, task))
    }

    async fn stop(&self, id: &str) -> ContainerResult<()> {
        self.docker_on(id, &["stop".to_string(), id.to_string()]).await?;
        debug!(%id, "container stopped");
        Ok(())
    }

    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> ContainerResult<Vec<String>> {
        let out = self.docker(&ps_args(labels)).await?;
        Ok(parse_ids(&out))
    }

    async fn address(&self, id: &str) -> ContainerResult<String> {
        let out = self.docker_on(id, &inspect_args(ADDRESS_FORMAT, id)).await?;
        match parse_address(&out) {
            Some(addr) => Ok(addr),
            None => {
                warn!(%id, "container has no network address");
                Err(ContainerError::NoAddress(id.to_string()))
            }
        }
    }

    async fn copy_into(&self, id: &str, mut archive: ByteStream) -> ContainerResult<()> {
        let command = format!("{} cp", self.binary);
        let target = format!("{id}:/");
        let mut child = Command::new(&self.binary)
            .args(["cp", "-", target.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;

        let copied = match child.stdin.take() {
            Some(mut stdin) => {
                let copied = tokio::io::copy(&mut archive, &mut stdin).await;
                drop(stdin);
                copied
            }
            None => Ok(0),
        };
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let failed = ContainerError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
            return Err(missing_container(id, failed));
        }
        let bytes = copied.map_err(|source| ContainerError::Stream { command, source })?;
        debug!(%id, bytes, "archive copied into container");
        Ok(())
    }

    async fn remove_files(&self, id: &str, paths: &[String]) -> ContainerResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.docker_on(id, &remove_args(id, paths)).await?;
        debug!(%id, files = paths.len(), "files removed from container");
        Ok(())
    }
}

fn inspect_args(format: &str, id: &str) -> Vec<String> {
    vec![
        "inspect".to_string(),
        "--format".to_string(),
        format.to_string(),
        id.to_string(),
    ]
}

/// Arguments for `docker exec ... rm -f`. `--` keeps paths from being read
/// as flags.
fn remove_args(id: &str, paths: &[String]) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        id.to_string(),
        "rm".to_string(),
        "-f".to_string(),
        "--".to_string(),
    ];
    args.extend(paths.iter().cloned());
    args
}

/// docker and podman both say "no such container" when the id is unknown.
fn is_missing_container(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such container")
}

fn missing_container(id: &str, err: ContainerError) -> ContainerError {
    match err {
        ContainerError::CommandFailed { ref stderr, .. } if is_missing_container(stderr) => {
            ContainerError::NotFound(id.to_string())
        }
        other => other,
    }
}

/// Arguments for `docker run`: detached, stdin attached.
fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--detach".to_string(), "-i".to_string()];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for mount in &spec.mounts {
        args.push("-v".to_string());
        args.push(mount.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    if let Some(command) = &spec.command {
        args.push(command.clone());
    }
    args.extend(spec.args.iter().cloned());
    args
}

/// Arguments for `docker ps` filtered by every label.
fn ps_args(labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec!["ps".to_string(), "--quiet".to_string(), "--no-trunc".to_string()];
    for (key, value) in labels {
        args.push("--filter".to_string());
        args.push(format!("label={key}={value}"));
    }
    args
}

fn parse_ids(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_address(out: &str) -> Option<String> {
    out.split_whitespace().next().map(str::to_string)
}

/// Copy two readers into one writer until both reach EOF.
async fn merge_into<A, B, W>(mut a: A, mut b: B, writer: &mut W) -> std::io::Result<u64>
where
    A: AsyncRead + Unpin,
    B: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut abuf = vec![0u8; 8192];
    let mut bbuf = vec![0u8; 8192];
    let (mut a_open, mut b_open) = (true, true);
    let mut total = 0u64;

    while a_open || b_open {
        tokio::select! {
            r = a.read(&mut abuf), if a_open => {
                let n = r?;
                if n == 0 {
                    a_open = false;
                } else {
                    writer.write_all(&abuf[..n]).await?;
                    total += n as u64;
                }
            }
            r = b.read(&mut bbuf), if b_open => {
                let n = r?;
                if n == 0 {
                    b_open = false;
                } else {
                    writer.write_all(&bbuf[..n]).await?;
                    total += n as u64;
                }
            }
        }
    }

    writer.flush().await?;
    Ok(total)
}
