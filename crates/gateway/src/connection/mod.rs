//! Broker connection lifecycle

pub mod backoff;
pub mod manager;
pub mod params;
pub mod session;

pub use backoff::BackoffPolicy;
pub use manager::{BrokerStreams, ConnectionEvent, ConnectionHandle, ConnectionManager, QueueCapacities};
pub use params::{ClientIdRegistry, ConnectionParams, DEFAULT_CLIENT_ID, DEFAULT_HOST, DEFAULT_PORT};
pub use session::{BrokerEventSink, BrokerSession, SessionSignal};
