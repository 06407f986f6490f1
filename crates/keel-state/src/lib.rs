//! keel-state: embedded storage for the Keel control plane.
//!
//! Two stores share one root directory:
//!
//! - [`MetadataStore`] keeps resource records and small blobs in a single
//!   [redb](https://docs.rs/redb) table under hierarchical `/`-separated keys
//!   (`apps/{app}/builds/{id}`, ...). Records are JSON; blobs are stored
//!   verbatim. Listing a key returns its immediate children.
//! - [`ObjectStore`] streams application objects to and from files under
//!   `{root}/objects/{app}/{key}` so object size is never bounded by memory.
//!
//! Both are `Clone + Send + Sync` and can be shared across async tasks.

pub mod error;
pub mod key;
pub mod objects;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use key::{join_key, normalize_key};
pub use objects::ObjectStore;
pub use store::MetadataStore;
