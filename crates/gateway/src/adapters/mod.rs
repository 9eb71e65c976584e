//! Broker adapters
//!
//! Adapters implement `BrokerSession` on top of a concrete broker API and
//! normalize its callbacks into gateway messages.

pub mod paper;

pub use paper::{AckMode, PaperBroker};
