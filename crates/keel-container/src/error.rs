//! Container runtime error types.

use thiserror::Error;

/// Errors raised by a container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Feeding input to a running command failed.
    #[error("failed to stream into {command}: {source}")]
    Stream {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("process id {id:?} is shorter than {min} characters")]
    InvalidProcessId { id: String, min: usize },

    #[error("process not found: {0}")]
    NotFound(String),

    #[error("no network address for process {0}")]
    NoAddress(String),
}

pub type ContainerResult<T> = Result<T, ContainerError>;
