//! Instrument identity
//!
//! The engine trades listed instruments routed through a broker; the only
//! thing it needs to know about one is how to address it.

mod instrument;

pub use instrument::InstrumentKey;
