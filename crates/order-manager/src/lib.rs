//! Meridian Order Manager
//!
//! The Order Manager sits between risk approval and the broker link,
//! responsible for:
//! - **Order Creation**: Turns an approved intent into a market or limit order
//! - **Submission**: Sends it under an acknowledgment deadline, never resending
//! - **Lifecycle**: Applies acks, executions and broker statuses in order
//! - **Ledger Feed**: Hands every execution to the ledger exactly once
//! - **Reconciliation**: Re-syncs local orders with the broker after a reconnect
//!
//! ## Architecture
//!
//! ```text
//! Risk Manager ──► Approved Intent ──► ┌────────────────────────────────────┐
//!                                      │           Order Manager            │
//!                                      │  ┌──────────────────────────────┐  │
//!                                      │  │  Order Table                 │  │
//!                                      │  │  - local id ↔ broker id      │  │
//!                                      │  │  - one lock per order        │  │
//!                                      │  └──────────────┬───────────────┘  │
//!                                      │                 │                  │
//!                                      │  ┌──────────────▼───────────────┐  │
//!                                      │  │  Lifecycle                   │  │
//!                                      │  │  Pending → Submitted →       │  │
//!                                      │  │  PartiallyFilled → Filled    │  │
//!                                      │  │  Cancelled / Rejected        │  │
//!                                      │  └──────────────┬───────────────┘  │
//!                                      └─────────────────┼──────────────────┘
//!                                                        │
//! Broker ◄──────────── Order Requests ◄──────────────────┘
//!
//! Broker ────────────► Executions ──────► Order Manager ──► Ledger
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_order_manager::{OrderManager, OrderManagerConfig};
//!
//! let oms = OrderManager::new(config, connection.clone(), ledger.clone(), clock);
//!
//! // Risk approved the intent
//! let order = oms.submit_intent(&intent, &decision).await?;
//!
//! // Broker events, in arrival order
//! oms.on_order_event(event).await;
//! ```

pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod manager;

pub use error::{OrderError, OrderStateConflict, ReconciliationMismatch, Result};
pub use gateway::OrderGateway;
pub use lifecycle::Transition;
pub use manager::{
    EventOutcome, OrderManager, OrderManagerConfig, OrderNotice, ReconcileReport, ShutdownPolicy,
    ShutdownReport, TradingMode,
};
