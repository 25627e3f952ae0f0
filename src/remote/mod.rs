//! The remote time-tracking API, as seen by the runtime.
//!
//! The runtime never speaks HTTP to the remote source itself. Hosts supply a
//! [`RemoteClient`] and the runtime drives it: long-poll for work, report
//! results, raise and clear health alerts, refresh managed configuration.
//!
//! # Example (fake for testing)
//!
//! ```ignore
//! struct FakeRemote {
//!     acks: Mutex<Vec<Acknowledgement>>,
//! }
//!
//! impl RemoteClient for FakeRemote {
//!     async fn acknowledge(&self, ack: &Acknowledgement) -> Result<(), RemoteError> {
//!         self.acks.lock().push(ack.clone());
//!         Ok(())
//!     }
//!     // ...
//! }
//! ```

use std::future::Future;

pub mod error;
pub mod wire;

pub use error::{RemoteError, RemoteErrorKind};
pub use wire::{
    Acknowledgement, HealthFailure, ManagedConfig, ManagedConfigRequest, WireStatus,
};

use crate::types::TimeGroup;

/// Client for the remote time-tracking API.
pub trait RemoteClient: Send + Sync + 'static {
    /// Long-polls for up to `limit` time groups awaiting processing.
    ///
    /// An empty batch is a normal answer. A poll that expires with nothing
    /// to deliver may instead surface as a [`RemoteErrorKind::Timeout`].
    fn fetch_time_groups(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TimeGroup>, RemoteError>> + Send;

    /// Reports how a time group was handled.
    fn acknowledge(
        &self,
        ack: &Acknowledgement,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Raises a health alert for this connector.
    fn notify_health_failure(
        &self,
        failure: &HealthFailure,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Clears any health alert raised earlier.
    fn rescind_health_failure(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Fetches the managed configuration for this connector.
    fn fetch_managed_config(
        &self,
        request: &ManagedConfigRequest,
    ) -> impl Future<Output = Result<ManagedConfig, RemoteError>> + Send;
}
