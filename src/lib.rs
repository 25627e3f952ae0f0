//! Connector Runtime - hosts an integration that records posted time in a
//! third-party system.
//!
//! The runtime receives time groups from a remote time-tracking source (by
//! long poll or webhook), hands each to the integration exactly once,
//! reports the outcome back, and keeps the integration's periodic sync jobs
//! and health in check. A durable delivery ledger makes redelivery after a
//! crash or restart harmless.
//!
//! Hosts implement [`Connector`] and [`RemoteClient`], then build a
//! [`ConnectorRuntime`] from a [`ConnectorConfig`].

pub mod ack;
pub mod clock;
pub mod config;
pub mod connector;
pub mod health;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod remote;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use ingest::EventProcessor;
pub use remote::RemoteClient;
pub use runtime::ConnectorRuntime;
pub use types::{Outcome, TimeGroup, TimeGroupId};
