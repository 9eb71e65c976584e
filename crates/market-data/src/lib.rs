//! Meridian Market Data Hub
//!
//! Normalizes inbound broker ticks into one canonical [`MarketSnapshot`] per
//! instrument and fans updates out to any number of subscribers.
//!
//! ```text
//! broker ticks ──► on_tick ──► per-instrument snapshot (watch channel)
//!                   │                 ├──► get_snapshot / checked_snapshot (copies)
//!                   │                 └──► subscribe_updates (latest-value streams)
//!                   └── older than current timestamp? dropped
//! ```
//!
//! Snapshots older than the staleness threshold are handed out with
//! `degraded = true`; strategies treat that as "no signal".

pub mod error;
pub mod hub;

pub use error::DataStaleError;
pub use hub::{HubStats, MarketDataHub, SnapshotStream, TickOutcome};
pub use meridian_core::MarketSnapshot;
