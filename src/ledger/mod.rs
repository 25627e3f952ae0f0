//! Delivery ledger: one row per time group recording how far its processing
//! and acknowledgement have got.
//!
//! # Lifecycle
//!
//! ```text
//!   (absent) ──claim──▶ IN_PROGRESS ──process──▶ SUCCESS | PERMANENT_FAILURE | TRANSIENT_FAILURE
//!                                                   │
//!                                          acknowledged upstream
//!                                                   ▼
//!                                                <status>_SENT
//! ```
//!
//! A failed row may be claimed again; a successful one never is.

pub mod delivery_ledger;
pub mod status;

pub use delivery_ledger::{
    Claim, DEFAULT_CLAIM_TIMEOUT_SECS, DEFAULT_RETENTION_DAYS, DeliveryLedger, LedgerConfig,
    TIME_GROUPS_RECEIVED_TABLE,
};
pub use status::{DeliveryRecord, DeliveryStatus, LedgerEntry, PendingAck, UnknownStatus};
