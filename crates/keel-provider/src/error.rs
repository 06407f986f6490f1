//! Provider error types.

use keel_container::ContainerError;
use keel_state::StateError;
use thiserror::Error;

/// Errors returned by every provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A referenced app, build, release, process, object or row is missing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input, passed through unchanged.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The container runtime failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] ContainerError),

    /// The router could not be reached or answered nonsense.
    #[error("router registration failed: {0}")]
    Registration(String),

    #[error("storage error: {0}")]
    Storage(StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StateError> for ProviderError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(key) => ProviderError::NotFound(key),
            StateError::InvalidKey(key) => {
                ProviderError::Validation(format!("invalid key {key:?}"))
            }
            other => ProviderError::Storage(other),
        }
    }
}

impl ProviderError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        ProviderError::NotFound(format!("{kind} {name}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
