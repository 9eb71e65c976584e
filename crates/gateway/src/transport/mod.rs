//! Transport abstraction layer
//!
//! Broker callbacks arrive on the SDK's threads; everything downstream reads
//! them from bounded single-consumer queues, one per source stream, so each
//! stream is processed in arrival order.

pub mod config;
pub mod queue;

pub use config::Topic;
pub use queue::{EventQueue, OverflowPolicy, QueueReceiver, QueueSender};
