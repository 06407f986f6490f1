//! keel-container: the container runtime adapter.
//!
//! The provider never talks to a container engine directly. It drives a
//! [`ContainerRuntime`], whose minimal contract is:
//!
//! - `run` a detached process with interactive input attached
//! - follow its `logs` until it exits
//! - `stop` it (best effort, bounded by the engine's own timeout)
//! - `list_by_labels` for bulk discovery during shutdown
//! - resolve its network `address` for port proxying
//! - `copy_into` and `remove_files` for patching a running filesystem
//!
//! [`DockerRuntime`] implements the contract on top of the `docker` CLI.

pub mod docker;
pub mod error;
#[cfg(feature = "fake")]
pub mod fake;
pub mod runtime;

pub use docker::DockerRuntime;
pub use error::{ContainerError, ContainerResult};
pub use runtime::{ContainerRuntime, LogStream, PROCESS_ID_LEN, RunSpec, process_handle};
