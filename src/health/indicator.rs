//! Named liveness signals.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A component that can report whether it is working.
pub trait HealthIndicator: Send + Sync {
    /// Name used in logs when this indicator reports unhealthy.
    fn name(&self) -> &str;

    fn is_healthy(&self) -> bool;
}

/// A health indicator backed by a closure.
pub struct HealthProbe {
    name: String,
    probe: Box<dyn Fn() -> bool + Send + Sync>,
}

impl HealthProbe {
    pub fn new(name: impl Into<String>, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        HealthProbe {
            name: name.into(),
            probe: Box::new(probe),
        }
    }

    /// Wraps the probe for registration with the health controller.
    pub fn shared(self) -> Arc<dyn HealthIndicator> {
        Arc::new(self)
    }
}

impl fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthProbe").field("name", &self.name).finish()
    }
}

impl HealthIndicator for HealthProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_healthy(&self) -> bool {
        (self.probe)()
    }
}

/// Evaluates an indicator. A panicking indicator reads as unhealthy.
pub fn probe(indicator: &dyn HealthIndicator) -> bool {
    catch_unwind(AssertUnwindSafe(|| indicator.is_healthy())).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_probe_reports_its_value() {
        assert!(probe(&HealthProbe::new("up", || true)));
        assert!(!probe(&HealthProbe::new("down", || false)));
    }

    #[test]
    fn panicking_probe_is_unhealthy() {
        let indicator = HealthProbe::new("broken", || panic!("probe failed"));
        assert!(!probe(&indicator));
    }

    #[test]
    fn debug_shows_name() {
        let indicator = HealthProbe::new("fetch-loop", || true);
        assert_eq!(format!("{:?}", indicator), "HealthProbe { name: \"fetch-loop\" }");
    }
}
