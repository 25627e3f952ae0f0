//! A periodic job that never overlaps with itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::health::HealthIndicator;

type BoxedRun = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Action = Box<dyn Fn() -> BoxedRun + Send + Sync>;

/// What happened when a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The action ran and returned `Ok`.
    Completed,
    /// The action ran and returned `Err`.
    Failed,
    /// A previous run was still in progress; this one was dropped.
    Skipped,
    /// The task is disabled; nothing ran.
    Disabled,
}

/// Clears the running flag when a run ends, including by panic or
/// cancellation.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A job run on a timer, at most one run at a time.
///
/// Liveness is tracked as the time of the last successful run. The task is
/// healthy while that is more recent than `max_staleness`. A disabled task
/// never runs and always reports healthy.
pub struct SingleFlightTask {
    name: String,
    action: Action,
    enabled: bool,
    max_staleness: Duration,
    clock: SharedClock,
    running: AtomicBool,
    last_success: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for SingleFlightTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightTask")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("max_staleness", &self.max_staleness)
            .field("running", &self.is_running())
            .field("last_success", &self.last_successful_run())
            .finish()
    }
}

impl SingleFlightTask {
    /// Creates an enabled task. It counts as having succeeded at creation.
    pub fn new<F, Fut>(name: impl Into<String>, max_staleness: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let clock = system_clock();
        SingleFlightTask {
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
            enabled: true,
            max_staleness,
            last_success: Mutex::new(clock.now()),
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// Replaces the clock, restarting the liveness window from its now.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.last_success = Mutex::new(clock.now());
        self.clock = clock;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs the action unless disabled or already running.
    pub async fn run_once(&self) -> RunOutcome {
        if !self.enabled {
            return RunOutcome::Disabled;
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(task = %self.name, "Previous run still in progress, skipping this tick");
            return RunOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        debug!(task = %self.name, "Run started");
        match (self.action)().await {
            Ok(()) => {
                self.record_success();
                debug!(task = %self.name, "Run completed");
                RunOutcome::Completed
            }
            Err(e) => {
                warn!(task = %self.name, error = %e, "Run failed");
                RunOutcome::Failed
            }
        }
    }

    /// Marks the task as having just succeeded.
    ///
    /// For work done outside [`run_once`](Self::run_once) that proves the
    /// job's purpose is being served.
    pub fn record_success(&self) {
        *self.last_success.lock() = self.clock.now();
    }

    pub fn last_successful_run(&self) -> DateTime<Utc> {
        *self.last_success.lock()
    }

    pub fn is_healthy(&self) -> bool {
        if !self.enabled {
            return true;
        }
        let max = chrono::Duration::from_std(self.max_staleness).unwrap_or(chrono::Duration::MAX);
        self.clock.now() - self.last_successful_run() < max
    }
}

impl HealthIndicator for SingleFlightTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_healthy(&self) -> bool {
        SingleFlightTask::is_healthy(self)
    }
}
