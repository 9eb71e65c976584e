use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BrokerOrderId, OrderId, Side};
use crate::instruments::InstrumentKey;

/// A confirmed execution reported by the broker
///
/// `(order_id, sequence)` identifies a fill; the broker may deliver the same
/// execution more than once and consumers must apply it at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub broker_order_id: Option<BrokerOrderId>,
    /// Per-order execution sequence number, starting at 1
    pub sequence: u64,
    pub instrument: InstrumentKey,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Idempotence key
    pub fn key(&self) -> (OrderId, u64) {
        (self.order_id, self.sequence)
    }

    /// Quantity signed by side
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signed(self.quantity)
    }
}
