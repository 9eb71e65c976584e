use chrono::Utc;
use meridian_core::Timestamp;
use meridian_ports::Clock;
use std::sync::Arc;

/// Wall-clock time in UTC, used by the running engine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub const fn new() -> Self {
        Self
    }

    /// Handle in the form the engine components take
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}
