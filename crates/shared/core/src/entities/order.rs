use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{OrderStatus, OrderType, Side, TimeInForce};
use crate::instruments::InstrumentKey;

/// Locally assigned order identifier (assigned at creation)
pub type OrderId = Uuid;

/// Broker-assigned order identifier (assigned on acknowledgment)
pub type BrokerOrderId = i64;

/// One entry of an order's status history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

/// Full order details
///
/// Status changes go through the order manager's state machine; the
/// mutators here only record what that state machine decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub broker_order_id: Option<BrokerOrderId>,
    /// The instrument being traded
    pub instrument: InstrumentKey,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Required for Limit and StopLimit orders
    pub limit_price: Option<Decimal>,
    /// Required for Stop and StopLimit orders
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    /// Volume-weighted average of all applied fills
    pub avg_fill_price: Option<Decimal>,
    /// Strategy whose intent produced this order
    pub strategy_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Every status visited, oldest first (starts with Pending)
    pub history: Vec<StatusChange>,
    pub reject_reason: Option<String>,
    /// A cancel was sent and not yet confirmed
    pub cancel_requested: bool,
    /// Submission outcome unknown (acknowledgment deadline passed)
    pub indeterminate: bool,
    /// Fill sequence numbers already counted into `filled_quantity`
    pub applied_fills: BTreeSet<u64>,
}

impl Order {
    /// Create a new pending order with explicit timestamp
    pub fn new(
        instrument: InstrumentKey,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        strategy_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            broker_order_id: None,
            instrument,
            side,
            order_type,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::default(),
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            strategy_id: strategy_id.into(),
            created_at,
            updated_at: created_at,
            history: vec![StatusChange {
                status: OrderStatus::Pending,
                at: created_at,
            }],
            reject_reason: None,
            cancel_requested: false,
            indeterminate: false,
            applied_fills: BTreeSet::new(),
        }
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Validate the order based on order type requirements
    pub fn validate(&self) -> bool {
        self.quantity > Decimal::ZERO
            && (!self.order_type.requires_limit_price() || self.limit_price.is_some())
            && (!self.order_type.requires_stop_price() || self.stop_price.is_some())
    }

    /// Returns remaining quantity to be filled
    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Remaining quantity signed by side, zero once the order can no longer trade
    pub fn open_signed_quantity(&self) -> Decimal {
        if self.status.is_open() {
            self.side.signed(self.remaining_quantity())
        } else {
            Decimal::ZERO
        }
    }

    /// Returns true if the order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    /// Whether the order ever passed through `status`
    pub fn visited(&self, status: OrderStatus) -> bool {
        self.history.iter().any(|change| change.status == status)
    }

    /// Move to `status` and append it to the history
    pub fn record_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        self.history.push(StatusChange { status, at });
    }

    /// Accumulate an execution into filled quantity and average price
    ///
    /// Returns false if this sequence number was already counted.
    pub fn record_fill(
        &mut self,
        sequence: u64,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.applied_fills.insert(sequence) {
            return false;
        }

        let prior_notional = self.avg_fill_price.unwrap_or_default() * self.filled_quantity;
        self.filled_quantity += quantity;
        if !self.filled_quantity.is_zero() {
            self.avg_fill_price = Some((prior_notional + quantity * price) / self.filled_quantity);
        }
        self.updated_at = at;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(quantity: Decimal) -> Order {
        Order::new(
            InstrumentKey::stock("AAPL"),
            Side::Buy,
            OrderType::Market,
            quantity,
            "test",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_order_starts_pending() {
        let o = order(dec!(100));
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(o.history.len(), 1);
        assert!(o.visited(OrderStatus::Pending));
        assert!(!o.visited(OrderStatus::Submitted));
        assert!(o.validate());
    }

    #[test]
    fn test_limit_requires_price() {
        let mut o = order(dec!(10));
        o.order_type = OrderType::Limit;
        assert!(!o.validate());
        let o = o.with_limit_price(dec!(150));
        assert!(o.validate());
    }

    #[test]
    fn test_record_fill_weighted_average() {
        let mut o = order(dec!(100));
        let now = Utc::now();

        assert!(o.record_fill(1, dec!(40), dec!(10), now));
        assert!(o.record_fill(2, dec!(60), dec!(11), now));

        assert_eq!(o.filled_quantity, dec!(100));
        assert_eq!(o.avg_fill_price, Some(dec!(10.6)));
        assert!(o.is_filled());
    }

    #[test]
    fn test_record_fill_ignores_redelivery() {
        let mut o = order(dec!(100));
        let now = Utc::now();

        assert!(o.record_fill(1, dec!(50), dec!(10), now));
        assert!(!o.record_fill(1, dec!(50), dec!(10), now));

        assert_eq!(o.filled_quantity, dec!(50));
        assert_eq!(o.remaining_quantity(), dec!(50));
    }

    #[test]
    fn test_open_signed_quantity() {
        let mut o = order(dec!(100));
        o.side = Side::Sell;
        o.record_fill(1, dec!(30), dec!(10), Utc::now());
        assert_eq!(o.open_signed_quantity(), dec!(-70));

        o.record_status(OrderStatus::Cancelled, Utc::now());
        assert_eq!(o.open_signed_quantity(), Decimal::ZERO);
    }
}
