//! Handling time groups pushed by webhook.
//!
//! Unlike the fetch loop, pushes arrive concurrently and the caller waits for
//! the outcome. A redelivered time group whose success or permanent failure
//! is already recorded gets that outcome back without being processed again.
//! Transient failures are processed again.
//!
//! Once claimed, a time group is processed and recorded on its own task, so
//! a caller that goes away mid-request cannot leave the claim dangling.

use std::sync::Arc;

use tracing::{Instrument, debug, instrument};

use super::processor::{Dispatcher, EventProcessor};
use super::pull::{IngestError, Result};
use crate::ack::AckPublisher;
use crate::ledger::{Claim, DeliveryLedger, DeliveryStatus, LedgerEntry};
use crate::remote::RemoteClient;
use crate::types::{Outcome, TimeGroup};

/// Failure returned while another request holds the claim.
pub const ALREADY_IN_PROGRESS_MESSAGE: &str = "Time group is already being processed";

/// The answer to one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub outcome: Outcome,
    /// True if the outcome came from the ledger rather than from processing.
    pub replayed: bool,
}

/// Processes time groups delivered by webhook.
#[derive(Debug)]
pub struct WebhookIngestor<C, P> {
    ledger: Arc<DeliveryLedger>,
    acks: Arc<AckPublisher<C>>,
    dispatcher: Dispatcher<P>,
}

impl<C: RemoteClient, P: EventProcessor> WebhookIngestor<C, P> {
    pub fn new(
        ledger: Arc<DeliveryLedger>,
        acks: Arc<AckPublisher<C>>,
        dispatcher: Dispatcher<P>,
    ) -> Self {
        WebhookIngestor {
            ledger,
            acks,
            dispatcher,
        }
    }

    #[instrument(skip_all, fields(time_group_id = %time_group.group_id))]
    pub async fn handle(&self, time_group: TimeGroup) -> Result<PushResult> {
        let id = time_group.group_id.clone();

        if let Some(entry) = self.ledger.lookup_for_push(&id)?
            && let Some(outcome) = final_outcome(&entry)
        {
            debug!(status = %entry.status, "Replaying recorded outcome");
            return Ok(PushResult {
                outcome,
                replayed: true,
            });
        }

        if let Claim::Held(entry) = self.ledger.claim(&id)? {
            let outcome = final_outcome(&entry)
                .unwrap_or_else(|| Outcome::transient(ALREADY_IN_PROGRESS_MESSAGE));
            debug!(status = %entry.status, "Claim held elsewhere");
            return Ok(PushResult {
                outcome,
                replayed: true,
            });
        }

        let ledger = self.ledger.clone();
        let acks = self.acks.clone();
        let dispatcher = self.dispatcher.clone();
        let recording = tokio::spawn(async move {
            let outcome = dispatcher.dispatch(time_group).await;
            ledger.upsert(
                &id,
                DeliveryStatus::from_outcome(&outcome),
                outcome.message(),
            )?;
            acks.notify(id, &outcome);
            Ok::<_, IngestError>(outcome)
        }
        .in_current_span());
        let outcome = recording.await??;

        Ok(PushResult {
            outcome,
            replayed: false,
        })
    }
}

/// The outcome to replay for a recorded entry: successes and permanent
/// failures only.
fn final_outcome(entry: &LedgerEntry) -> Option<Outcome> {
    match entry.status {
        DeliveryStatus::Success
        | DeliveryStatus::SuccessSent
        | DeliveryStatus::PermanentFailure
        | DeliveryStatus::PermanentFailureSent => entry.outcome(),
        _ => None,
    }
}
