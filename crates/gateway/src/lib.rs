//! Meridian Gateway
//!
//! Broker link for the Meridian trading engine. Provides:
//! - The `BrokerSession` port a broker SDK adapter implements
//! - The `ConnectionManager`: connect/disconnect, reconnect with backoff,
//!   subscriptions that survive reconnects
//! - Wire message types for market data, orders and account updates
//! - Bounded per-stream event queues between broker callbacks and the engine
//! - A paper broker adapter for paper trading and tests
//!
//! ## Architecture
//!
//! ```text
//! Broker (SDK adapter / PaperBroker)
//!         │ callbacks
//!    ┌────▼──────────────┐
//!    │ BrokerEventSink   │──signals──► ConnectionManager ──► ConnectionEvent
//!    └────┬───┬───┬──────┘              (reconnect loop)      (Lost/Restored/Fatal)
//!         │   │   │ queues:
//!         │   │   └─ account   (backpressure)
//!         │   └───── orders    (backpressure)
//!         └───────── market    (drop-oldest)
//!                      │
//!                 Engine loop
//! ```

pub mod adapters;
pub mod connection;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used types
pub use adapters::paper::{AckMode, PaperBroker};
pub use connection::{
    BackoffPolicy, BrokerEventSink, BrokerSession, BrokerStreams, ClientIdRegistry,
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionParams, QueueCapacities,
};
pub use error::{ConnectionError, TransportError};
pub use messages::{
    AccountEvent, AccountSummary, AccountTag, BrokerOrderStatus, CancelRequest, OrderAck,
    OrderEvent, OrderRequest, OrderStatusReport, PositionReport, TickMessage,
};
pub use transport::{EventQueue, OverflowPolicy, QueueReceiver, QueueSender, Topic};
