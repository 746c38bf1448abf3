//! redb table definitions for the durable instance store.

use redb::TableDefinition;

/// Live instances keyed by provider instance id, JSON values.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
