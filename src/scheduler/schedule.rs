//! Driving tasks from a timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::task::SingleFlightTask;

/// Shortest period accepted; a zero period would spin.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// When a task first runs and how often after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSchedule {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl TaskSchedule {
    pub const fn new(initial_delay: Duration, period: Duration) -> Self {
        TaskSchedule {
            initial_delay,
            period,
        }
    }

    pub const fn from_secs(initial_delay_secs: u64, period_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(initial_delay_secs),
            Duration::from_secs(period_secs),
        )
    }

    /// The same schedule with a different period.
    pub const fn with_period(self, period: Duration) -> Self {
        Self::new(self.initial_delay, period)
    }
}

/// Ticks `task` on `schedule` until `shutdown` is cancelled.
///
/// Each tick starts a run in its own tokio task, so a long run never delays
/// the timer. The task's single-flight guard drops ticks that arrive while a
/// run is in progress. On shutdown, runs still in progress are aborted and
/// the returned handle completes only once they have ended.
pub fn spawn_scheduled(
    task: Arc<SingleFlightTask>,
    schedule: TaskSchedule,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !task.is_enabled() {
            info!(task = %task.name(), "Task disabled, not scheduling");
            return;
        }

        let period = schedule.period.max(MIN_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + schedule.initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            task = %task.name(),
            initial_delay_secs = schedule.initial_delay.as_secs(),
            period_secs = period.as_secs(),
            "Task scheduled"
        );

        let mut runs = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(task = %task.name(), "Shutdown signal received, stopping schedule");
                    break;
                }
                _ = ticker.tick() => {
                    let task = task.clone();
                    runs.spawn(async move { task.run_once().await });
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    log_run_end(task.name(), joined.err());
                }
            }
        }

        runs.abort_all();
        while let Some(joined) = runs.join_next().await {
            log_run_end(task.name(), joined.err());
        }
    })
}

fn log_run_end(name: &str, error: Option<JoinError>) {
    match error {
        Some(e) if e.is_panic() => error!(task = %name, "Run panicked"),
        Some(_) => debug!(task = %name, "Run aborted by shutdown"),
        None => {}
    }
}
