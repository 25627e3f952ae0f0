//! Handing time groups to the integration.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::metrics::ProcessingMetrics;
use crate::types::{Outcome, TimeGroup, UNEXPECTED_ERROR_MESSAGE};

/// Failure message for a time group carrying the wrong caller key.
pub const INVALID_CALLER_KEY_MESSAGE: &str = "Invalid caller key in posted time webhook call";

/// Records a time group in the integration's system.
///
/// Called at most once per claim, on the blocking thread pool. Returning
/// `Err` or panicking is recorded as a permanent failure carrying the error
/// text.
pub trait EventProcessor: Send + Sync + 'static {
    fn process(&self, time_group: &TimeGroup) -> anyhow::Result<Outcome>;
}

impl<F> EventProcessor for F
where
    F: Fn(&TimeGroup) -> anyhow::Result<Outcome> + Send + Sync + 'static,
{
    fn process(&self, time_group: &TimeGroup) -> anyhow::Result<Outcome> {
        self(time_group)
    }
}

/// Runs an [`EventProcessor`] and always produces an [`Outcome`].
///
/// When a caller key is configured, time groups that do not carry it fail
/// permanently without reaching the processor.
#[derive(Debug)]
pub struct Dispatcher<P> {
    processor: Arc<P>,
    caller_key: Option<String>,
    metrics: Arc<ProcessingMetrics>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Dispatcher {
            processor: self.processor.clone(),
            caller_key: self.caller_key.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<P: EventProcessor> Dispatcher<P> {
    pub fn new(processor: Arc<P>, caller_key: Option<String>) -> Self {
        Dispatcher {
            processor,
            caller_key: caller_key.filter(|k| !k.is_empty()),
            metrics: Arc::new(ProcessingMetrics::new()),
        }
    }

    /// Counts successes into `metrics` instead of a private counter.
    pub fn with_metrics(mut self, metrics: Arc<ProcessingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ProcessingMetrics> {
        &self.metrics
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    pub async fn dispatch(&self, time_group: TimeGroup) -> Outcome {
        let id = time_group.group_id.clone();

        if let Some(expected) = &self.caller_key
            && time_group.caller_key.as_deref() != Some(expected.as_str())
        {
            warn!(time_group_id = %id, "Caller key mismatch, rejecting time group");
            return Outcome::permanent(INVALID_CALLER_KEY_MESSAGE);
        }

        let processor = self.processor.clone();
        let outcome = match tokio::task::spawn_blocking(move || processor.process(&time_group)).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(time_group_id = %id, error = %format!("{:#}", e), "Processing failed");
                Outcome::PermanentFailure(format!("{:#}", e))
            }
            Err(join_error) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(payload),
                    Err(_) => UNEXPECTED_ERROR_MESSAGE.to_string(),
                };
                error!(time_group_id = %id, panic = %message, "Processing panicked");
                Outcome::PermanentFailure(message)
            }
        };

        if outcome.is_success() {
            self.metrics.record_time_group();
        }
        debug!(time_group_id = %id, outcome = %outcome, "Processed");
        outcome
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNEXPECTED_ERROR_MESSAGE.to_string()
    }
}
