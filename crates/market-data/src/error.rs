//! Error types for the market data hub

use chrono::Duration;
use meridian_core::InstrumentKey;
use thiserror::Error;

/// No usable market data for an instrument
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataStaleError {
    #[error("No market data for {0}")]
    NoData(InstrumentKey),

    #[error("Market data for {instrument} is {age} old")]
    Stale {
        instrument: InstrumentKey,
        age: Duration,
    },
}
