//! Wire message types for the broker link
//!
//! The normalized shape of everything crossing the broker boundary, in
//! either direction. A broker SDK adapter converts its native callbacks into
//! these before they reach the event queues.

pub mod account;
pub mod market_data;
pub mod order;

pub use account::{AccountEvent, AccountSummary, AccountTag, PositionReport};
pub use market_data::TickMessage;
pub use order::{
    BrokerOrderStatus, CancelRequest, OrderAck, OrderEvent, OrderRequest, OrderStatusReport,
};
