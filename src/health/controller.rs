//! Periodic health evaluation and escalation.
//!
//! Each tick asks the integration first, then every registered indicator.
//! The tick is unhealthy on the first indicator that reports false.
//!
//! - **Unhealthy**: raise an alert upstream (best effort) and count it. At
//!   the threshold (3 consecutive ticks by default) run the shutdown action,
//!   which by default exits the process so a supervisor restarts it. The
//!   count is not reset by shutdown, so every further unhealthy tick repeats
//!   the action.
//! - **Healthy**: clear the alert upstream (best effort) and reset the count.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::indicator::{HealthIndicator, probe};
use crate::remote::{HealthFailure, RemoteClient};
use crate::scheduler::{MIN_PERIOD, TaskSchedule};

/// Default number of consecutive unhealthy ticks before shutdown.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default schedule for health ticks (first after 5 s, then every minute).
pub const DEFAULT_HEALTH_SCHEDULE: TaskSchedule = TaskSchedule::from_secs(5, 60);

type ConnectorCheck = Box<dyn Fn() -> Result<(), HealthFailure> + Send + Sync>;

/// What to do once the failure threshold is reached.
#[derive(Clone)]
pub struct ShutdownAction(Arc<dyn Fn() + Send + Sync>);

impl ShutdownAction {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        ShutdownAction(Arc::new(action))
    }

    /// Exits the process with status 1.
    pub fn exit_process() -> Self {
        Self::new(|| {
            error!("Connector unhealthy for too long, exiting");
            std::process::exit(1);
        })
    }

    fn run(&self) {
        (self.0)()
    }
}

impl fmt::Debug for ShutdownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownAction")
    }
}

/// Result of one health tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy {
        reason: HealthFailure,
        consecutive_failures: u32,
    },
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }
}

/// Aggregates liveness and escalates repeated failure.
pub struct HealthController<C> {
    client: Arc<C>,
    connector_check: ConnectorCheck,
    indicators: Vec<Arc<dyn HealthIndicator>>,
    failures: AtomicU32,
    threshold: u32,
    shutdown: ShutdownAction,
}

impl<C> fmt::Debug for HealthController<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.indicators.iter().map(|i| i.name()).collect();
        f.debug_struct("HealthController")
            .field("indicators", &names)
            .field("failures", &self.failures.load(Ordering::Relaxed))
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl<C: RemoteClient> HealthController<C> {
    /// Creates a controller with no connector check, the default threshold
    /// and process exit as the shutdown action.
    pub fn new(client: Arc<C>) -> Self {
        HealthController {
            client,
            connector_check: Box::new(|| Ok(())),
            indicators: Vec::new(),
            failures: AtomicU32::new(0),
            threshold: DEFAULT_FAILURE_THRESHOLD,
            shutdown: ShutdownAction::exit_process(),
        }
    }

    /// Sets the integration's own health check, evaluated before the
    /// indicators.
    pub fn with_connector_check(
        mut self,
        check: impl Fn() -> Result<(), HealthFailure> + Send + Sync + 'static,
    ) -> Self {
        self.connector_check = Box::new(check);
        self
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    pub fn with_shutdown_action(mut self, action: ShutdownAction) -> Self {
        self.shutdown = action;
        self
    }

    pub fn register(&mut self, indicator: Arc<dyn HealthIndicator>) {
        self.indicators.push(indicator);
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn HealthIndicator>) -> Self {
        self.register(indicator);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Evaluates the connector check and the indicators without side
    /// effects.
    pub fn evaluate(&self) -> Result<(), HealthFailure> {
        match catch_unwind(AssertUnwindSafe(|| (self.connector_check)())) {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => return Err(failure),
            Err(_) => return Err(HealthFailure::new("Connector health check panicked")),
        }

        for indicator in &self.indicators {
            if !probe(indicator.as_ref()) {
                return Err(HealthFailure::new(format!(
                    "Health indicator {} is unhealthy",
                    indicator.name()
                )));
            }
        }
        Ok(())
    }

    /// Runs one health tick.
    pub async fn tick(&self) -> HealthVerdict {
        match self.evaluate() {
            Ok(()) => {
                if let Err(e) = self.client.rescind_health_failure().await {
                    debug!(error = %e, "Could not clear health alert");
                }
                let previous = self.failures.swap(0, Ordering::AcqRel);
                if previous > 0 {
                    info!(previous_failures = previous, "Connector healthy again");
                }
                HealthVerdict::Healthy
            }
            Err(reason) => {
                warn!(reason = %reason, "Connector unhealthy");
                if let Err(e) = self.client.notify_health_failure(&reason).await {
                    debug!(error = %e, "Could not raise health alert");
                }
                let consecutive_failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if consecutive_failures >= self.threshold {
                    error!(
                        consecutive_failures,
                        threshold = self.threshold,
                        "Health failure threshold reached, shutting down"
                    );
                    self.shutdown.run();
                }
                HealthVerdict::Unhealthy {
                    reason,
                    consecutive_failures,
                }
            }
        }
    }

    /// Ticks on `schedule` until `shutdown` is cancelled.
    pub fn spawn(
        self: Arc<Self>,
        schedule: TaskSchedule,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + schedule.initial_delay;
            let period = schedule.period.max(MIN_PERIOD);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("Health ticks stopped");
        })
    }
}
