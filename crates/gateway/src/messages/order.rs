//! Order message types

use chrono::{DateTime, Utc};
use meridian_core::{
    BrokerOrderId, Fill, InstrumentKey, Order, OrderId, OrderType, Side, TimeInForce,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order submission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Local order id, carried as the broker-side order reference
    pub order_id: OrderId,
    pub account: String,
    pub instrument: InstrumentKey,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// Build the request for a locally created order
    pub fn from_order(order: &Order, account: impl Into<String>) -> Self {
        Self {
            order_id: order.id,
            account: account.into(),
            instrument: order.instrument.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            time_in_force: order.time_in_force,
        }
    }
}

/// Broker's answer to an order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderAck {
    Accepted {
        order_id: OrderId,
        broker_order_id: BrokerOrderId,
    },
    Rejected {
        order_id: OrderId,
        reason: String,
    },
}

impl OrderAck {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderAck::Accepted { order_id, .. } | OrderAck::Rejected { order_id, .. } => *order_id,
        }
    }
}

/// Cancel request for an acknowledged order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub order_id: OrderId,
    pub broker_order_id: BrokerOrderId,
}

/// Order status as the broker sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    /// Live at the broker, possibly partially filled
    Working,
    Filled,
    Cancelled,
    Rejected,
}

impl BrokerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BrokerOrderStatus::Working)
    }
}

/// Broker's record of one order (pushed on change, or fetched for reconciliation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Local id from the order reference, when the broker echoes it
    pub order_id: Option<OrderId>,
    pub broker_order_id: BrokerOrderId,
    pub instrument: InstrumentKey,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: BrokerOrderStatus,
    /// Rejection or cancellation reason
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Events on the order stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    Status(OrderStatusReport),
    Execution(Fill),
}
