use meridian_core::Timestamp;

/// Port for time abstraction
///
/// Staleness checks, order-rate windows, reconciliation grace periods and
/// timestamps on locally created orders all read time through this port:
/// - Wall-clock time in paper and live trading
/// - Manually advanced time in tests
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}
