//! Order Manager errors

use meridian_core::{BrokerOrderId, OrderId, OrderStatus};
use meridian_gateway::ConnectionError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A broker event that arrived for an order in a state that cannot take it
///
/// Expected under races (a fill after a confirmed cancel, a re-delivered
/// terminal status). Logged as a warning, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStateConflict {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub event: String,
}

impl fmt::Display for OrderStateConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "order {} is {}, ignoring {}",
            self.order_id, self.status, self.event
        )
    }
}

/// Local and broker records of an order disagree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationMismatch {
    pub order_id: OrderId,
    pub broker_order_id: Option<BrokerOrderId>,
    pub local_filled: Decimal,
    pub broker_filled: Decimal,
    pub detail: String,
}

impl fmt::Display for ReconciliationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "order {} (broker {:?}): local filled {}, broker filled {}: {}",
            self.order_id, self.broker_order_id, self.local_filled, self.broker_filled, self.detail
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Order manager is not accepting new orders")]
    NotAccepting,

    #[error("Live trading was not confirmed; order refused")]
    LiveTradingNotConfirmed,

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Risk decision carries nothing to trade")]
    NothingToSubmit,

    #[error("Order {order_id} rejected by broker: {reason}")]
    Rejected { order_id: OrderId, reason: String },

    #[error("No acknowledgment for order {order_id} within {timeout:?}; state indeterminate")]
    AckTimeout { order_id: OrderId, timeout: Duration },

    #[error("Unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("Cannot cancel order {order_id} in state {status}")]
    CancelNotAllowed {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("Order state conflict: {0}")]
    StateConflict(OrderStateConflict),

    #[error("Reconciliation mismatch: {0}")]
    Reconciliation(ReconciliationMismatch),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub type Result<T> = std::result::Result<T, OrderError>;
