//! redb table definitions for the metadata store.

use redb::TableDefinition;

/// Every record and blob, keyed by its full hierarchical path
/// (`apps/{app}/builds/{id}`). Values are JSON records or raw bytes.
pub const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");
