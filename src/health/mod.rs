//! Health supervision.
//!
//! Components expose liveness as [`HealthIndicator`]s. The
//! [`HealthController`] polls them together with the integration's own
//! check, reports the verdict upstream and shuts the process down after
//! repeated failure.

pub mod controller;
pub mod indicator;

pub use controller::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_HEALTH_SCHEDULE, HealthController, HealthVerdict,
    ShutdownAction,
};
pub use indicator::{HealthIndicator, HealthProbe, probe};
