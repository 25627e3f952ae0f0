//! Single-flight periodic jobs.
//!
//! Every background job (acknowledgement sweep, tag and activity-type sync,
//! managed-config refresh) is a [`SingleFlightTask`] driven by
//! [`spawn_scheduled`].
//!
//! # States
//!
//! ```text
//! Idle ──tick──▶ Running ──done──▶ Idle
//!                   │
//!                 tick ──▶ dropped (logged)
//! ```
//!
//! Only a run that returns `Ok` moves the last-success time forward.

pub mod schedule;
pub mod task;

pub use schedule::{MIN_PERIOD, TaskSchedule, spawn_scheduled};
pub use task::{RunOutcome, SingleFlightTask};
