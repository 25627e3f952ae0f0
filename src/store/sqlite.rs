//! Embedded SQLite storage.
//!
//! A single connection guarded by a mutex. Every caller either runs a
//! read-only closure against the connection or a closure inside a transaction
//! that commits only if the closure returns `Ok`.
//!
//! # Location
//!
//! - `data_dir` set: `<data_dir>/connector.sqlite`, survives restarts.
//! - `data_dir` unset: a fresh temporary directory. Deduplication then only
//!   holds for the lifetime of the process, which is logged at startup.
//! - `require_persistent` with no `data_dir`: refused.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use thiserror::Error;
use tracing::{info, warn};

use super::table::TableDef;

/// File name of the database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "connector.sqlite";

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected a statement or could not open the database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error while preparing the data directory.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Persistent storage was required but no data directory is configured.
    #[error("persistent storage is required but no data directory is configured (set DATA_DIR)")]
    PersistentDirRequired,
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Where the store should live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the database file. `None` means a temporary directory.
    pub data_dir: Option<PathBuf>,

    /// Refuse to start without `data_dir`.
    pub require_persistent: bool,
}

/// Where an opened store actually lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A database file under the configured data directory.
    Persistent(PathBuf),
    /// A database file in a temporary directory.
    Temporary(PathBuf),
    /// An in-memory database.
    Memory,
}

/// Durable, transactional SQL storage.
#[derive(Debug)]
pub struct DurableStore {
    conn: Mutex<Connection>,
    location: StoreLocation,
}

impl DurableStore {
    /// Opens the store described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        match &config.data_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(DATABASE_FILE_NAME);
                let store = Self::open_file(&path)?;
                info!(path = %path.display(), "Opened persistent store");
                Ok(store)
            }
            None if config.require_persistent => Err(StoreError::PersistentDirRequired),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("connector-store-")
                    .tempdir()?
                    .keep();
                let path = dir.join(DATABASE_FILE_NAME);
                let conn = Connection::open(&path)?;
                warn!(
                    path = %path.display(),
                    "No data directory configured; deduplication state will not survive a restart"
                );
                Self::from_connection(conn, StoreLocation::Temporary(path))
            }
        }
    }

    /// Opens (creating if needed) a database file at `path`.
    pub fn open_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, StoreLocation::Persistent(path.to_path_buf()))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, StoreLocation::Memory)
    }

    fn from_connection(conn: Connection, location: StoreLocation) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(DurableStore {
            conn: Mutex::new(conn),
            location,
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Returns true if the data survives a process restart.
    pub fn is_persistent(&self) -> bool {
        matches!(self.location, StoreLocation::Persistent(_))
    }

    /// Creates `table` if missing and applies any missing column additions.
    ///
    /// Returns true if the table already existed.
    pub fn create_table(&self, table: &TableDef) -> Result<bool> {
        let conn = self.conn.lock();

        let existed: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            rusqlite::params![table.name],
            |row| row.get(0),
        )?;

        conn.execute_batch(&table.create_sql())?;

        if existed && !table.additions.is_empty() {
            let columns = column_names(&conn, table.name)?;
            for addition in table.additions {
                if !columns.contains(addition.column) {
                    conn.execute_batch(&table.add_column_sql(addition))?;
                    info!(table = table.name, column = addition.column, "Added column");
                }
            }
        }

        for index in table.indexes {
            conn.execute_batch(index)?;
        }

        Ok(existed)
    }

    /// Runs `f` against the connection outside of an explicit transaction.
    pub fn query<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    /// Runs `f` inside a transaction, committing if it returns `Ok`.
    ///
    /// On `Err` the transaction is rolled back when dropped.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}
