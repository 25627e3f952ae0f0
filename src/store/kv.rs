//! Key/value storage for integrations.
//!
//! Integrations use this to remember small pieces of state between runs,
//! typically a sync cursor such as the last tag id sent upstream.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use super::sqlite::{DurableStore, Result};
use super::table::TableDef;

/// Table backing [`KeyValueStore`].
pub const KEY_MAP_TABLE: TableDef = TableDef {
    name: "key_map",
    columns: "key_name TEXT PRIMARY KEY, value TEXT",
    indexes: &[],
    additions: &[],
};

/// String and integer values stored by key.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    store: Arc<DurableStore>,
}

impl KeyValueStore {
    /// Wraps `store`, creating the backing table if needed.
    pub fn open(store: Arc<DurableStore>) -> Result<Self> {
        store.create_table(&KEY_MAP_TABLE)?;
        Ok(KeyValueStore { store })
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.store.query(|conn| {
            conn.query_row(
                "SELECT value FROM key_map WHERE key_name = ?1",
                rusqlite::params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.store.transaction(|tx| {
            let updated = tx.execute(
                "UPDATE key_map SET value = ?2 WHERE key_name = ?1",
                rusqlite::params![key, value],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO key_map (key_name, value) VALUES (?1, ?2)",
                    rusqlite::params![key, value],
                )?;
            }
            Ok(())
        })
    }

    /// Reads an integer value. A stored value that is not an integer reads as
    /// absent.
    pub fn get_long(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .get_string(key)?
            .and_then(|v| v.trim().parse::<i64>().ok()))
    }

    pub fn put_long(&self, key: &str, value: i64) -> Result<()> {
        self.put_string(key, &value.to_string())
    }

    /// Removes `key`. Returns true if it was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.store.transaction(|tx| {
            let removed = tx.execute(
                "DELETE FROM key_map WHERE key_name = ?1",
                rusqlite::params![key],
            )?;
            Ok(removed > 0)
        })
    }
}
