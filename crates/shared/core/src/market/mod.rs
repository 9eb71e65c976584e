//! Canonical market state per instrument

mod snapshot;
mod tick;

pub use snapshot::MarketSnapshot;
pub use tick::TickField;
