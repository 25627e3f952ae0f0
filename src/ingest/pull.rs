//! The long-polling fetch loop.
//!
//! # Event Processing Flow
//!
//! For each fetched time group, strictly in fetch order:
//! 1. Look it up in the ledger (stale claims read as absent)
//! 2. Skip it if it succeeded or is claimed; re-send the success if it
//!    succeeded, in case the earlier acknowledgement was lost
//! 3. Claim it (`IN_PROGRESS`)
//! 4. Re-read the raw status and abandon it unless still `IN_PROGRESS`
//! 5. Process it
//! 6. Record the outcome, then start the immediate acknowledgement
//!
//! # Backoff
//!
//! See [`FetchBackoff`]. Shutdown interrupts both the long poll and the
//! backoff sleep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::FetchBackoff;
use super::processor::{Dispatcher, EventProcessor};
use crate::ack::AckPublisher;
use crate::clock::{SharedClock, system_clock};
use crate::health::HealthIndicator;
use crate::ledger::{Claim, DeliveryLedger, DeliveryStatus, LedgerEntry};
use crate::remote::RemoteClient;
use crate::store::StoreError;
use crate::types::{Outcome, TimeGroup};

/// Default number of time groups requested per poll.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default age of the last completed poll after which the loop is unhealthy
/// (10 minutes).
const DEFAULT_MAX_STALENESS_SECS: u64 = 10 * 60;

/// Errors that can occur while ingesting a time group.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(#[from] StoreError),

    /// The task recording a claimed time group ended without finishing.
    #[error("processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Configuration for the fetch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub batch_size: usize,
    pub backoff: FetchBackoff,
    /// Unhealthy once no poll has completed for this long.
    pub max_staleness: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        FetchConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            backoff: FetchBackoff::new(),
            max_staleness: Duration::from_secs(DEFAULT_MAX_STALENESS_SECS),
        }
    }
}

/// What happened to one fetched time group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed to this outcome.
    Processed(Outcome),
    /// Not processed: already succeeded or claimed elsewhere.
    Skipped(DeliveryStatus),
    /// Claimed, but the row changed before processing began.
    Abandoned,
}

/// Counts from one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

/// Pulls time groups from the remote source and processes each exactly once.
#[derive(Debug)]
pub struct FetchLoop<C, P> {
    client: Arc<C>,
    ledger: Arc<DeliveryLedger>,
    acks: Arc<AckPublisher<C>>,
    dispatcher: Dispatcher<P>,
    config: FetchConfig,
    clock: SharedClock,
    last_poll: Mutex<DateTime<Utc>>,
}

impl<C: RemoteClient, P: EventProcessor> FetchLoop<C, P> {
    pub fn new(
        client: Arc<C>,
        ledger: Arc<DeliveryLedger>,
        acks: Arc<AckPublisher<C>>,
        dispatcher: Dispatcher<P>,
        config: FetchConfig,
    ) -> Self {
        let clock = system_clock();
        FetchLoop {
            client,
            ledger,
            acks,
            dispatcher,
            config,
            last_poll: Mutex::new(clock.now()),
            clock,
        }
    }

    /// Replaces the clock, restarting the liveness window from its now.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.last_poll = Mutex::new(clock.now());
        self.clock = clock;
        self
    }

    /// Polls and processes until `shutdown` is cancelled.
    #[instrument(skip_all, name = "fetch_loop")]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(batch_size = self.config.batch_size, "Fetch loop started");

        while !shutdown.is_cancelled() {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.client.fetch_time_groups(self.config.batch_size) => fetched,
            };

            let delay = match fetched {
                Ok(batch) => match self.process_batch(batch, &shutdown).await {
                    Ok(report) => {
                        self.record_poll();
                        if report.processed + report.skipped + report.abandoned > 0 {
                            debug!(
                                processed = report.processed,
                                skipped = report.skipped,
                                abandoned = report.abandoned,
                                "Batch finished"
                            );
                        }
                        None
                    }
                    Err(e) => {
                        error!(error = %e, "Batch aborted");
                        Some(self.config.backoff.error_delay())
                    }
                },
                Err(e) if e.is_timeout() => {
                    self.record_poll();
                    debug!(error = %e, "Long poll timed out, reconnecting");
                    Some(self.config.backoff.timeout_delay())
                }
                Err(e) => {
                    warn!(error = %e, "Fetch failed, backing off");
                    Some(self.config.backoff.error_delay())
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!("Fetch loop stopped");
    }

    /// Processes a fetched batch in order.
    ///
    /// Stops early, leaving the rest for redelivery, if `shutdown` is
    /// cancelled between time groups.
    pub async fn process_batch(
        &self,
        batch: Vec<TimeGroup>,
        shutdown: &CancellationToken,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for time_group in batch {
            if shutdown.is_cancelled() {
                break;
            }
            match self.process_one(time_group).await? {
                Disposition::Processed(_) => report.processed += 1,
                Disposition::Skipped(_) => report.skipped += 1,
                Disposition::Abandoned => report.abandoned += 1,
            }
        }
        Ok(report)
    }

    /// Runs one time group through lookup, claim, processing and recording.
    pub async fn process_one(&self, time_group: TimeGroup) -> Result<Disposition> {
        let id = time_group.group_id.clone();

        if let Some(entry) = self.ledger.lookup_for_pull(&id)?
            && entry.status.blocks_reprocessing()
        {
            return Ok(self.skip(time_group, entry));
        }

        if let Claim::Held(entry) = self.ledger.claim(&id)? {
            return Ok(self.skip(time_group, entry));
        }

        let status = self.ledger.raw_status(&id)?;
        if status != Some(DeliveryStatus::InProgress) {
            warn!(time_group_id = %id, status = ?status, "Claim lost before processing, abandoning");
            return Ok(Disposition::Abandoned);
        }

        let outcome = self.dispatcher.dispatch(time_group).await;
        self.ledger.upsert(
            &id,
            DeliveryStatus::from_outcome(&outcome),
            outcome.message(),
        )?;
        self.acks.notify(id, &outcome);

        Ok(Disposition::Processed(outcome))
    }

    fn skip(&self, time_group: TimeGroup, entry: LedgerEntry) -> Disposition {
        debug!(time_group_id = %time_group.group_id, status = %entry.status, "Already handled, skipping");
        if entry.status.is_success() {
            self.acks.notify(time_group.group_id, &Outcome::Success);
        }
        Disposition::Skipped(entry.status)
    }

    fn record_poll(&self) {
        *self.last_poll.lock() = self.clock.now();
    }

    /// When the last poll completed (with a batch or a clean timeout).
    pub fn last_poll(&self) -> DateTime<Utc> {
        *self.last_poll.lock()
    }
}

impl<C: RemoteClient, P: EventProcessor> HealthIndicator for FetchLoop<C, P> {
    fn name(&self) -> &str {
        "fetch-loop"
    }

    fn is_healthy(&self) -> bool {
        let max = chrono::Duration::from_std(self.config.max_staleness)
            .unwrap_or(chrono::Duration::MAX);
        self.clock.now() - self.last_poll() < max
    }
}
