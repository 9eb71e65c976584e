//! Meridian Core Domain
//!
//! Pure domain types for the Meridian trading engine.
//! This crate contains no async, no I/O, and is 100% unit testable.
//!
//! Every price, quantity, and money amount is a `Decimal`; every timestamp is
//! UTC. Components own their state and hand out copies of these types.

pub mod entities;
pub mod instruments;
pub mod market;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Account
    AccountState,
    // Orders and executions
    BrokerOrderId,
    Fill,
    IntentQuantity,
    Order,
    OrderId,
    OrderStatus,
    OrderType,
    // Positions
    Position,
    Side,
    StatusChange,
    TimeInForce,
    // Strategy output
    TradeIntent,
};
pub use instruments::InstrumentKey;
pub use market::{MarketSnapshot, TickField};
pub use values::{Money, Price, Quantity, Symbol, Timestamp};
