//! The acknowledgement publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::health::HealthIndicator;
use crate::ledger::{DeliveryLedger, DeliveryStatus};
use crate::remote::{Acknowledgement, RemoteClient, RemoteError, WireStatus};
use crate::store::StoreError;
use crate::types::{Outcome, TimeGroupId};

/// Errors that can occur while acknowledging results.
#[derive(Debug, Error)]
pub enum AckError {
    /// Reading or updating the ledger failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] StoreError),

    /// The remote source rejected or did not receive an acknowledgement.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Results were pending and none of them could be sent.
    #[error("remote unreachable: all {failed} pending acknowledgements failed")]
    RemoteUnreachable { failed: usize },
}

/// Result type for acknowledgement operations.
pub type Result<T> = std::result::Result<T, AckError>;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Sends results upstream and marks them sent in the ledger.
#[derive(Debug)]
pub struct AckPublisher<C> {
    ledger: Arc<DeliveryLedger>,
    client: Arc<C>,
    last_sweep_ok: AtomicBool,
}

impl<C: RemoteClient> AckPublisher<C> {
    pub fn new(ledger: Arc<DeliveryLedger>, client: Arc<C>) -> Self {
        AckPublisher {
            ledger,
            client,
            last_sweep_ok: AtomicBool::new(true),
        }
    }

    /// Reports one result.
    ///
    /// Returns false if `status` has nothing to report (`IN_PROGRESS` or an
    /// already-sent status). On a remote error the row is left as it was for
    /// the next sweep.
    #[instrument(skip_all, fields(time_group_id = %event_id, status = %status))]
    pub async fn send_one(
        &self,
        event_id: &TimeGroupId,
        status: DeliveryStatus,
        message: &str,
    ) -> Result<bool> {
        let Some(wire_status) = WireStatus::from_status(status) else {
            debug!("Nothing to acknowledge");
            return Ok(false);
        };

        let ack = Acknowledgement {
            time_group_id: event_id.clone(),
            status: wire_status,
            message: (!message.is_empty()).then(|| message.to_string()),
        };

        if let Err(e) = self.client.acknowledge(&ack).await {
            warn!(error = %e, "Acknowledgement failed");
            return Err(e.into());
        }

        let marked = self.ledger.mark_acknowledged(event_id, status)?;
        debug!(marked, "Acknowledged");
        Ok(true)
    }

    /// Starts an immediate, best-effort acknowledgement of `outcome`.
    ///
    /// Failures are logged; the sweep retries them.
    pub fn notify(self: &Arc<Self>, event_id: TimeGroupId, outcome: &Outcome) -> JoinHandle<()> {
        let publisher = self.clone();
        let status = DeliveryStatus::from_outcome(outcome);
        let message = outcome.message().to_string();

        tokio::spawn(async move {
            if let Err(e) = publisher.send_one(&event_id, status, &message).await {
                debug!(
                    time_group_id = %event_id,
                    error = %e,
                    "Immediate acknowledgement failed, leaving it for the sweep"
                );
            }
        })
    }

    /// Sends every pending result.
    ///
    /// A failed item does not stop the sweep. The sweep as a whole fails if
    /// the ledger cannot be read, or if results were pending and every send
    /// failed.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let pending = match self.ledger.pending_acknowledgements() {
            Ok(pending) => pending,
            Err(e) => {
                self.last_sweep_ok.store(false, Ordering::Release);
                warn!(error = %e, "Could not read pending acknowledgements");
                return Err(e.into());
            }
        };

        let mut report = SweepReport {
            pending: pending.len(),
            ..SweepReport::default()
        };

        for item in pending {
            match self
                .send_one(&item.event_id, item.status, &item.message)
                .await
            {
                Ok(true) => report.sent += 1,
                Ok(false) => {}
                Err(_) => report.failed += 1,
            }
        }

        let unreachable = report.failed > 0 && report.sent == 0;
        self.last_sweep_ok.store(!unreachable, Ordering::Release);

        if report.pending > 0 {
            info!(
                pending = report.pending,
                sent = report.sent,
                failed = report.failed,
                "Acknowledgement sweep finished"
            );
        }

        if unreachable {
            return Err(AckError::RemoteUnreachable {
                failed: report.failed,
            });
        }
        Ok(report)
    }

    /// True unless the most recent sweep failed.
    pub fn last_sweep_succeeded(&self) -> bool {
        self.last_sweep_ok.load(Ordering::Acquire)
    }
}

impl<C: RemoteClient> HealthIndicator for AckPublisher<C> {
    fn name(&self) -> &str {
        "ack-publisher"
    }

    fn is_healthy(&self) -> bool {
        self.last_sweep_succeeded()
    }
}
