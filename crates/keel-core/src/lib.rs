pub mod config;
pub mod id;
pub mod types;

pub use config::{KeelConfig, ProviderKind};
pub use id::{BUILD_PREFIX, ID_SUFFIX_LEN, RELEASE_PREFIX, ROW_PREFIX, generate_id};
pub use types::*;
