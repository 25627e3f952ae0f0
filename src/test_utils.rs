//! Shared test utilities: a scriptable remote, a recording processor and
//! arbitrary generators for property-based testing.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use proptest::prelude::*;

use crate::ingest::EventProcessor;
use crate::ledger::DeliveryStatus;
use crate::remote::{
    Acknowledgement, HealthFailure, ManagedConfig, ManagedConfigRequest, RemoteClient, RemoteError,
};
use crate::types::{Outcome, TimeGroup, TimeGroupId};

pub fn arb_time_group_id() -> impl Strategy<Value = TimeGroupId> {
    "tg-[a-z0-9]{1,12}".prop_map(TimeGroupId::new)
}

pub fn arb_delivery_status() -> impl Strategy<Value = DeliveryStatus> {
    proptest::sample::select(DeliveryStatus::ALL.to_vec())
}

pub fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Success),
        "[a-z ]{0,20}".prop_map(Outcome::TransientFailure),
        "[a-z ]{0,20}".prop_map(Outcome::PermanentFailure),
    ]
}

/// A [`RemoteClient`] that serves scripted fetch results and records every
/// call.
///
/// Once the script is exhausted, `fetch_time_groups` blocks forever, like a
/// long poll with nothing to deliver.
#[derive(Debug, Default)]
pub struct FakeRemote {
    batches: Mutex<VecDeque<Result<Vec<TimeGroup>, RemoteError>>>,
    fetches: AtomicUsize,
    acks: Mutex<Vec<Acknowledgement>>,
    fail_all_acks: AtomicBool,
    failing_ack_ids: Mutex<HashSet<TimeGroupId>>,
    health_failures: Mutex<Vec<HealthFailure>>,
    rescinds: AtomicUsize,
    fail_health_calls: AtomicBool,
    managed_config: Mutex<Option<ManagedConfig>>,
    config_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<TimeGroup>) {
        self.batches.lock().push_back(Ok(batch));
    }

    pub fn push_fetch_error(&self, error: RemoteError) {
        self.batches.lock().push_back(Err(error));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.acks.lock().clone()
    }

    pub fn fail_acknowledgements(&self, fail: bool) {
        self.fail_all_acks.store(fail, Ordering::SeqCst);
    }

    pub fn fail_acknowledgement_for(&self, id: &TimeGroupId) {
        self.failing_ack_ids.lock().insert(id.clone());
    }

    pub fn health_failures(&self) -> Vec<HealthFailure> {
        self.health_failures.lock().clone()
    }

    pub fn rescinds(&self) -> usize {
        self.rescinds.load(Ordering::SeqCst)
    }

    pub fn fail_health_calls(&self, fail: bool) {
        self.fail_health_calls.store(fail, Ordering::SeqCst);
    }

    pub fn set_managed_config(&self, config: ManagedConfig) {
        *self.managed_config.lock() = Some(config);
    }

    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }
}

impl RemoteClient for FakeRemote {
    async fn fetch_time_groups(&self, _limit: usize) -> Result<Vec<TimeGroup>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn acknowledge(&self, ack: &Acknowledgement) -> Result<(), RemoteError> {
        if self.fail_all_acks.load(Ordering::SeqCst)
            || self.failing_ack_ids.lock().contains(&ack.time_group_id)
        {
            return Err(RemoteError::unavailable("acknowledgement endpoint down"));
        }
        self.acks.lock().push(ack.clone());
        Ok(())
    }

    async fn notify_health_failure(&self, failure: &HealthFailure) -> Result<(), RemoteError> {
        self.health_failures.lock().push(failure.clone());
        if self.fail_health_calls.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable("health endpoint down"));
        }
        Ok(())
    }

    async fn rescind_health_failure(&self) -> Result<(), RemoteError> {
        self.rescinds.fetch_add(1, Ordering::SeqCst);
        if self.fail_health_calls.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable("health endpoint down"));
        }
        Ok(())
    }

    async fn fetch_managed_config(
        &self,
        _request: &ManagedConfigRequest,
    ) -> Result<ManagedConfig, RemoteError> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        self.managed_config
            .lock()
            .clone()
            .ok_or_else(|| RemoteError::rejected("no managed config issued"))
    }
}

type Respond = Box<dyn Fn(&TimeGroup) -> anyhow::Result<Outcome> + Send + Sync>;

/// An [`EventProcessor`] that records the ids it was given.
pub struct RecordingProcessor {
    seen: Mutex<Vec<TimeGroupId>>,
    respond: Respond,
}

impl std::fmt::Debug for RecordingProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingProcessor")
            .field("seen", &self.seen.lock())
            .finish()
    }
}

impl RecordingProcessor {
    pub fn new(respond: impl Fn(&TimeGroup) -> anyhow::Result<Outcome> + Send + Sync + 'static) -> Self {
        RecordingProcessor {
            seen: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub fn returning(outcome: Outcome) -> Self {
        Self::new(move |_| Ok(outcome.clone()))
    }

    pub fn seen(&self) -> Vec<TimeGroupId> {
        self.seen.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }
}

impl EventProcessor for RecordingProcessor {
    fn process(&self, time_group: &TimeGroup) -> anyhow::Result<Outcome> {
        self.seen.lock().push(time_group.group_id.clone());
        (self.respond)(time_group)
    }
}
