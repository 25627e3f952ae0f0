//! Hosting a connector.
//!
//! [`ConnectorRuntime`] owns every long-running piece:
//!
//! - the receive transport picked by `RECEIVE_POSTED_TIME` (fetch loop,
//!   webhook server, or nothing)
//! - tag and activity type sync jobs, each with a fast and a slow loop
//! - managed configuration refresh ([`ManagedConfigRefresher`])
//! - the acknowledgement sweep
//! - health supervision over all of the above
//!
//! All of them stop on one cancellation token.

mod connector_runtime;
pub mod managed_config;

#[cfg(test)]
mod tests;

pub use connector_runtime::{ConnectorRuntime, Result, RuntimeBuilder, RuntimeError};
pub use managed_config::{ManagedConfigRefresher, RENEWAL_THRESHOLD_MINS};
