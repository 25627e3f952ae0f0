//! Durable storage.
//!
//! [`DurableStore`] wraps one SQLite database: table creation with column
//! additions, read closures and transactional write closures. The delivery
//! ledger and the integration-facing [`KeyValueStore`] are both built on it.

pub mod kv;
pub mod sqlite;
pub mod table;

pub use kv::{KEY_MAP_TABLE, KeyValueStore};
pub use sqlite::{DATABASE_FILE_NAME, DurableStore, Result, StoreConfig, StoreError, StoreLocation};
pub use table::{ColumnAddition, TableDef};
