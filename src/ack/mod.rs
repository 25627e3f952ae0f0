//! Reporting processing results back to the remote source.
//!
//! Results are sent twice over: once immediately after processing
//! ([`AckPublisher::notify`]) and again by the periodic
//! [`sweep`](AckPublisher::sweep) for anything the immediate send missed.
//! The remote treats acknowledgements as idempotent, so a duplicate is
//! harmless while a lost one would leave the time group unresolved upstream.

pub mod publisher;

pub use publisher::{AckError, AckPublisher, Result, SweepReport};
