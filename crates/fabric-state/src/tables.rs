//! redb table definitions for the state store adapter.
//!
//! All configuration records share one table with `&str` keys and `&[u8]`
//! values. Keys are paths of the form `{config_root}/{kind}/{id}`, so a
//! prefix scan over `{config_root}/{kind}/` enumerates one record kind.

use redb::TableDefinition;

/// Configuration records keyed by their full path.
pub const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("config");
