//! Getting time groups into the integration exactly once.
//!
//! Two transports feed the same ledger-guarded path:
//!
//! - [`FetchLoop`] long-polls the remote source and works through each batch
//!   sequentially.
//! - [`WebhookIngestor`] handles time groups pushed over HTTP, concurrently,
//!   answering each with its outcome.
//!
//! Both consult the ledger before processing and claim the row first, so a
//! time group that already succeeded, or that another worker is processing,
//! is never handed to the integration again. Failed time groups are.

pub mod backoff;
pub mod processor;
pub mod pull;
pub mod push;

pub use backoff::FetchBackoff;
pub use processor::{Dispatcher, EventProcessor, INVALID_CALLER_KEY_MESSAGE};
pub use pull::{
    BatchReport, DEFAULT_BATCH_SIZE, Disposition, FetchConfig, FetchLoop, IngestError, Result,
};
pub use push::{ALREADY_IN_PROGRESS_MESSAGE, PushResult, WebhookIngestor};
