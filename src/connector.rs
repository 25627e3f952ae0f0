//! The integration hosted by the runtime.

use std::future::Future;

use crate::ingest::EventProcessor;
use crate::remote::HealthFailure;

/// Version reported to the remote source.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// An integration: records posted time and keeps reference data in sync.
///
/// Only [`EventProcessor::process`] is required. The sync hooks run on their
/// own schedules, never overlapping with themselves, and an `Err` leaves the
/// job's liveness untouched so it eventually turns the connector unhealthy.
pub trait Connector: EventProcessor {
    /// Identifies the integration to the remote source.
    fn connector_type(&self) -> &str {
        "connector-runtime"
    }

    /// Pushes new or changed tags upstream.
    fn sync_tags(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Slowly walks all tags, refreshing ones the fast loop would miss.
    fn sync_tags_slow_loop(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    fn sync_activity_types(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    fn sync_activity_types_slow_loop(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    /// The integration's own view of its health, checked before any other
    /// indicator on each health tick.
    fn check_health(&self) -> Result<(), HealthFailure> {
        Ok(())
    }

    /// Called once when the runtime stops.
    fn shutdown(&self) {}
}
