//! The `time_groups_received` table.
//!
//! # Staleness
//!
//! An `IN_PROGRESS` row older than the claim timeout belongs to a process
//! that died mid-processing. [`DeliveryLedger::lookup_for_pull`] and
//! [`DeliveryLedger::lookup_for_push`] treat it as absent so the event is
//! picked up again. [`DeliveryLedger::raw_status`] does not filter.
//!
//! # Retention
//!
//! Every write first deletes rows not updated within the retention window.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, trace};

use super::status::{DeliveryRecord, DeliveryStatus, LedgerEntry, PendingAck};
use crate::clock::{SharedClock, duration_millis, system_clock};
use crate::store::{DurableStore, Result, TableDef};
use crate::types::TimeGroupId;

/// Default age after which an `IN_PROGRESS` claim is abandoned (5 minutes).
pub const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 5 * 60;

/// Default retention for ledger rows (60 days).
pub const DEFAULT_RETENTION_DAYS: u64 = 60;

/// Table backing [`DeliveryLedger`].
pub const TIME_GROUPS_RECEIVED_TABLE: TableDef = TableDef {
    name: "time_groups_received",
    columns: "event_id TEXT PRIMARY KEY, \
              status TEXT NOT NULL, \
              message TEXT NOT NULL DEFAULT '', \
              created_at INTEGER NOT NULL, \
              updated_at INTEGER NOT NULL",
    indexes: &[
        "CREATE INDEX IF NOT EXISTS time_groups_received_status \
         ON time_groups_received (status, updated_at)",
        "CREATE INDEX IF NOT EXISTS time_groups_received_updated \
         ON time_groups_received (updated_at)",
    ],
    additions: &[],
};

/// Timing rules for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Age after which an `IN_PROGRESS` row is treated as absent.
    pub claim_timeout: Duration,

    /// Age after which any row is deleted.
    pub retention: Duration,

    /// Minimum age of a result before the acknowledgement sweep reports it.
    ///
    /// Default: zero. The runtime sets this so the immediate send after
    /// processing gets the first attempt.
    pub ack_grace: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        LedgerConfig {
            claim_timeout: Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * 24 * 60 * 60),
            ack_grace: Duration::ZERO,
        }
    }
}

/// Result of [`DeliveryLedger::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The row is now `IN_PROGRESS` and owned by the caller.
    Acquired,

    /// Another claim is live or the event already succeeded.
    Held(LedgerEntry),
}

/// Per-event delivery state, the source of truth for deduplication.
#[derive(Debug, Clone)]
pub struct DeliveryLedger {
    store: Arc<DurableStore>,
    config: LedgerConfig,
    clock: SharedClock,
}

impl DeliveryLedger {
    /// Opens the ledger on `store` with the system clock.
    pub fn open(store: Arc<DurableStore>, config: LedgerConfig) -> Result<Self> {
        Self::with_clock(store, config, system_clock())
    }

    pub fn with_clock(
        store: Arc<DurableStore>,
        config: LedgerConfig,
        clock: SharedClock,
    ) -> Result<Self> {
        store.create_table(&TIME_GROUPS_RECEIVED_TABLE)?;
        Ok(DeliveryLedger {
            store,
            config,
            clock,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Looks up an event seen by the fetch loop, hiding stale claims.
    pub fn lookup_for_pull(&self, event_id: &TimeGroupId) -> Result<Option<LedgerEntry>> {
        let cutoff = self.stale_claim_cutoff();
        self.store.query(|conn| read_fresh(conn, event_id, cutoff))
    }

    /// Looks up an event received by webhook, hiding stale claims.
    pub fn lookup_for_push(&self, event_id: &TimeGroupId) -> Result<Option<LedgerEntry>> {
        let cutoff = self.stale_claim_cutoff();
        self.store.query(|conn| read_fresh(conn, event_id, cutoff))
    }

    /// Reads the stored status with no staleness filtering.
    pub fn raw_status(&self, event_id: &TimeGroupId) -> Result<Option<DeliveryStatus>> {
        self.store.query(|conn| {
            conn.query_row(
                "SELECT status FROM time_groups_received WHERE event_id = ?1",
                rusqlite::params![event_id.as_str()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Reads the whole row.
    pub fn record(&self, event_id: &TimeGroupId) -> Result<Option<DeliveryRecord>> {
        self.store.query(|conn| {
            conn.query_row(
                "SELECT status, message, created_at, updated_at \
                 FROM time_groups_received WHERE event_id = ?1",
                rusqlite::params![event_id.as_str()],
                |row| {
                    Ok(DeliveryRecord {
                        event_id: event_id.clone(),
                        status: row.get(0)?,
                        message: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Sets the status of an event, inserting the row if it does not exist.
    ///
    /// Runs in one transaction that also purges rows past retention.
    pub fn upsert(
        &self,
        event_id: &TimeGroupId,
        status: DeliveryStatus,
        message: &str,
    ) -> Result<()> {
        let now = self.clock.now_millis();
        let retention_cutoff = now.saturating_sub(duration_millis(self.config.retention));

        self.store.transaction(|tx| {
            purge_expired(tx, retention_cutoff)?;
            write_status(tx, event_id, status, message, now)
        })?;

        debug!(time_group_id = %event_id, status = %status, "Ledger updated");
        Ok(())
    }

    /// Atomically claims an event for processing.
    ///
    /// Succeeds unless a fresh row already blocks reprocessing (a live claim
    /// or a success). Two concurrent claims for one id never both succeed.
    pub fn claim(&self, event_id: &TimeGroupId) -> Result<Claim> {
        let now = self.clock.now_millis();
        let stale_cutoff = self.stale_claim_cutoff();
        let retention_cutoff = now.saturating_sub(duration_millis(self.config.retention));

        let claim = self.store.transaction(|tx| {
            purge_expired(tx, retention_cutoff)?;
            if let Some(entry) = read_fresh(tx, event_id, stale_cutoff)?
                && entry.status.blocks_reprocessing()
            {
                return Ok(Claim::Held(entry));
            }
            write_status(tx, event_id, DeliveryStatus::InProgress, "", now)?;
            Ok(Claim::Acquired)
        })?;

        match &claim {
            Claim::Acquired => debug!(time_group_id = %event_id, "Claimed"),
            Claim::Held(entry) => {
                debug!(time_group_id = %event_id, status = %entry.status, "Claim refused")
            }
        }
        Ok(claim)
    }

    /// Moves a result to its `*_SENT` form, provided the row still holds
    /// `status`.
    ///
    /// Returns false if there is nothing to mark: the status has no
    /// acknowledged form, or the row was reclaimed or removed after the
    /// result was read.
    pub fn mark_acknowledged(&self, event_id: &TimeGroupId, status: DeliveryStatus) -> Result<bool> {
        let Some(sent) = status.acknowledged() else {
            return Ok(false);
        };
        let now = self.clock.now_millis();
        let retention_cutoff = now.saturating_sub(duration_millis(self.config.retention));

        let marked = self.store.transaction(|tx| {
            purge_expired(tx, retention_cutoff)?;
            tx.execute(
                "UPDATE time_groups_received SET status = ?3, updated_at = ?4 \
                 WHERE event_id = ?1 AND status = ?2",
                rusqlite::params![event_id.as_str(), status, sent, now],
            )
        })?;

        debug!(time_group_id = %event_id, status = %sent, marked = marked > 0, "Marked acknowledged");
        Ok(marked > 0)
    }

    /// Deletes the row for an event. Returns true if it existed.
    pub fn remove(&self, event_id: &TimeGroupId) -> Result<bool> {
        self.store.transaction(|tx| {
            let removed = tx.execute(
                "DELETE FROM time_groups_received WHERE event_id = ?1",
                rusqlite::params![event_id.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Results the remote source has not been told about, oldest first.
    pub fn pending_acknowledgements(&self) -> Result<Vec<PendingAck>> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(duration_millis(self.config.ack_grace));

        let pending = self.store.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, status, message FROM time_groups_received \
                 WHERE status IN (?1, ?2) AND updated_at <= ?3 \
                 ORDER BY updated_at, event_id",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![
                    DeliveryStatus::Success,
                    DeliveryStatus::PermanentFailure,
                    cutoff
                ],
                |row| {
                    Ok(PendingAck {
                        event_id: TimeGroupId::new(row.get::<_, String>(0)?),
                        status: row.get(1)?,
                        message: row.get(2)?,
                    })
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        trace!(count = pending.len(), "Read pending acknowledgements");
        Ok(pending)
    }

    fn stale_claim_cutoff(&self) -> i64 {
        self.clock
            .now_millis()
            .saturating_sub(duration_millis(self.config.claim_timeout))
    }
}

fn read_fresh(
    conn: &Connection,
    event_id: &TimeGroupId,
    stale_cutoff: i64,
) -> rusqlite::Result<Option<LedgerEntry>> {
    conn.query_row(
        "SELECT status, message FROM time_groups_received \
         WHERE event_id = ?1 AND NOT (status = ?2 AND updated_at < ?3)",
        rusqlite::params![event_id.as_str(), DeliveryStatus::InProgress, stale_cutoff],
        |row| {
            Ok(LedgerEntry {
                status: row.get(0)?,
                message: row.get(1)?,
            })
        },
    )
    .optional()
}

fn write_status(
    tx: &Transaction<'_>,
    event_id: &TimeGroupId,
    status: DeliveryStatus,
    message: &str,
    now: i64,
) -> rusqlite::Result<()> {
    let updated = tx.execute(
        "UPDATE time_groups_received SET status = ?2, message = ?3, updated_at = ?4 \
         WHERE event_id = ?1",
        rusqlite::params![event_id.as_str(), status, message, now],
    )?;
    if updated == 0 {
        tx.execute(
            "INSERT INTO time_groups_received (event_id, status, message, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![event_id.as_str(), status, message, now],
        )?;
    }
    Ok(())
}

fn purge_expired(tx: &Transaction<'_>, cutoff: i64) -> rusqlite::Result<usize> {
    let purged = tx.execute(
        "DELETE FROM time_groups_received WHERE updated_at < ?1",
        rusqlite::params![cutoff],
    )?;
    if purged > 0 {
        debug!(purged, "Purged expired ledger rows");
    }
    Ok(purged)
}
