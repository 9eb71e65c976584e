//! Order state machine
//!
//! ```text
//! Pending ──ack──► Submitted ──fill──► PartiallyFilled ⇄ (fill)
//!    │                 │                    │
//!    │                 ├──fill (complete)──►│──► Filled
//!    │                 ├──cancel confirmed──┴──► Cancelled
//!    └──reject─────────┴──reject────────────────► Rejected
//! ```
//!
//! Transitions never skip a state: an execution for a `Pending` order first
//! records the implicit acknowledgment. Terminal orders take no further
//! events, and a `NeedsAttention` order is frozen until an operator acts.

use chrono::{DateTime, Utc};
use meridian_core::{BrokerOrderId, Fill, Order, OrderStatus};
use meridian_gateway::{BrokerOrderStatus, OrderStatusReport};

use crate::error::OrderStateConflict;

/// What an event did to an order
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Now in this status
    Changed(OrderStatus),
    /// Accepted, nothing to change
    Unchanged,
    /// Already seen
    Duplicate,
    /// Not applicable in the current state
    Conflict(OrderStateConflict),
}

fn conflict(order: &Order, event: impl Into<String>) -> Transition {
    Transition::Conflict(OrderStateConflict {
        order_id: order.id,
        status: order.status,
        event: event.into(),
    })
}

/// Broker accepted the order and assigned `broker_order_id`
pub fn acknowledge(order: &mut Order, broker_order_id: BrokerOrderId, at: DateTime<Utc>) -> Transition {
    match order.status {
        OrderStatus::Pending => {
            order.broker_order_id = Some(broker_order_id);
            order.indeterminate = false;
            order.record_status(OrderStatus::Submitted, at);
            Transition::Changed(OrderStatus::Submitted)
        }
        _ if order.broker_order_id == Some(broker_order_id) => Transition::Duplicate,
        _ if order.broker_order_id.is_none() && !order.status.is_terminal() => {
            order.broker_order_id = Some(broker_order_id);
            Transition::Unchanged
        }
        _ => conflict(order, format!("acknowledgment as broker order {}", broker_order_id)),
    }
}

/// Broker refused the order, or it was lost
pub fn reject(order: &mut Order, reason: impl Into<String>, at: DateTime<Utc>) -> Transition {
    let reason = reason.into();
    if !order.status.is_open() {
        return conflict(order, format!("rejection ({})", reason));
    }
    order.reject_reason = Some(reason);
    order.indeterminate = false;
    order.record_status(OrderStatus::Rejected, at);
    Transition::Changed(OrderStatus::Rejected)
}

/// Broker confirmed the cancel
pub fn confirm_cancel(order: &mut Order, at: DateTime<Utc>) -> Transition {
    if !order.status.accepts_cancel() {
        return conflict(order, "cancel confirmation");
    }
    order.record_status(OrderStatus::Cancelled, at);
    Transition::Changed(OrderStatus::Cancelled)
}

/// Count an execution into the order
pub fn apply_execution(order: &mut Order, fill: &Fill) -> Transition {
    if order.applied_fills.contains(&fill.sequence) {
        return Transition::Duplicate;
    }
    match order.status {
        OrderStatus::Pending => {
            // Execution is proof of acceptance
            order.broker_order_id = order.broker_order_id.or(fill.broker_order_id);
            order.indeterminate = false;
            order.record_status(OrderStatus::Submitted, fill.timestamp);
        }
        OrderStatus::Submitted | OrderStatus::PartiallyFilled => {}
        _ => {
            return conflict(
                order,
                format!("execution #{} of {} @ {}", fill.sequence, fill.quantity, fill.price),
            );
        }
    }

    order.record_fill(fill.sequence, fill.quantity, fill.price, fill.timestamp);
    let next = if order.is_filled() {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    };
    if order.status != next {
        order.record_status(next, fill.timestamp);
    }
    Transition::Changed(next)
}

/// Apply a pushed broker status
///
/// Fill quantities are taken from executions only; a `Filled` report with
/// no matching executions yet leaves the order as it is.
pub fn apply_status_report(order: &mut Order, report: &OrderStatusReport) -> Transition {
    if order.status == OrderStatus::NeedsAttention {
        return conflict(order, format!("broker status {:?}", report.status));
    }

    let acked = if order.status == OrderStatus::Pending {
        acknowledge(order, report.broker_order_id, report.timestamp);
        true
    } else {
        false
    };

    let result = match report.status {
        BrokerOrderStatus::Working | BrokerOrderStatus::Filled => Transition::Unchanged,
        BrokerOrderStatus::Cancelled => {
            if order.status.is_terminal() {
                return conflict(order, "cancel report");
            }
            confirm_cancel(order, report.timestamp)
        }
        BrokerOrderStatus::Rejected => reject(
            order,
            report.reason.clone().unwrap_or_else(|| "rejected by broker".into()),
            report.timestamp,
        ),
    };

    match result {
        Transition::Unchanged if acked => Transition::Changed(OrderStatus::Submitted),
        other => other,
    }
}

/// Park an order for operator review
pub fn flag_attention(order: &mut Order, at: DateTime<Utc>) -> Transition {
    if order.status == OrderStatus::NeedsAttention {
        return Transition::Duplicate;
    }
    order.record_status(OrderStatus::NeedsAttention, at);
    Transition::Changed(OrderStatus::NeedsAttention)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{InstrumentKey, OrderType, Side};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn order(qty: Decimal) -> Order {
        Order::new(
            InstrumentKey::stock("AAPL"),
            Side::Buy,
            OrderType::Market,
            qty,
            "test",
            Utc::now(),
        )
    }

    fn fill(order: &Order, sequence: u64, qty: Decimal) -> Fill {
        Fill {
            order_id: order.id,
            broker_order_id: Some(42),
            sequence,
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: qty,
            price: dec!(10),
            timestamp: Utc::now(),
        }
    }

    fn report(status: BrokerOrderStatus) -> OrderStatusReport {
        OrderStatusReport {
            order_id: None,
            broker_order_id: 42,
            instrument: InstrumentKey::stock("AAPL"),
            side: Side::Buy,
            quantity: dec!(100),
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status,
            reason: Some("no liquidity".into()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_single_fill_goes_through_submitted() {
        let mut o = order(dec!(100));
        let f = fill(&o, 1, dec!(100));

        // Fill arrives before the ack
        assert_eq!(apply_execution(&mut o, &f), Transition::Changed(OrderStatus::Filled));
        assert!(o.visited(OrderStatus::Submitted));
        assert!(!o.visited(OrderStatus::PartiallyFilled));
        assert_eq!(o.broker_order_id, Some(42));

        // Late ack is a duplicate
        assert_eq!(acknowledge(&mut o, 42, Utc::now()), Transition::Duplicate);
    }

    #[test]
    fn test_multiple_fills_visit_partially_filled() {
        let mut o = order(dec!(100));
        acknowledge(&mut o, 42, Utc::now());

        let first = fill(&o, 1, dec!(50));
        let second = fill(&o, 2, dec!(50));
        assert_eq!(
            apply_execution(&mut o, &first),
            Transition::Changed(OrderStatus::PartiallyFilled)
        );
        assert_eq!(apply_execution(&mut o, &first), Transition::Duplicate);
        assert_eq!(apply_execution(&mut o, &second), Transition::Changed(OrderStatus::Filled));

        assert_eq!(o.filled_quantity, dec!(100));
        let statuses: Vec<_> = o.history.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Pending,
                OrderStatus::Submitted,
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled
            ]
        );
    }

    #[test]
    fn test_fill_after_cancel_is_conflict() {
        let mut o = order(dec!(100));
        acknowledge(&mut o, 42, Utc::now());
        assert_eq!(
            apply_status_report(&mut o, &report(BrokerOrderStatus::Cancelled)),
            Transition::Changed(OrderStatus::Cancelled)
        );

        let late = fill(&o, 1, dec!(10));
        assert!(matches!(apply_execution(&mut o, &late), Transition::Conflict(_)));
        assert_eq!(o.filled_quantity, Decimal::ZERO);
        assert_eq!(o.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_cancel_after_fill_is_conflict() {
        let mut o = order(dec!(10));
        acknowledge(&mut o, 42, Utc::now());
        let f = fill(&o, 1, dec!(10));
        apply_execution(&mut o, &f);

        assert!(matches!(
            apply_status_report(&mut o, &report(BrokerOrderStatus::Cancelled)),
            Transition::Conflict(_)
        ));
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn test_reject_report_on_pending_acks_first() {
        let mut o = order(dec!(100));
        assert_eq!(
            apply_status_report(&mut o, &report(BrokerOrderStatus::Rejected)),
            Transition::Changed(OrderStatus::Rejected)
        );
        assert!(o.visited(OrderStatus::Submitted));
        assert_eq!(o.reject_reason.as_deref(), Some("no liquidity"));
    }

    #[test]
    fn test_working_report_acks_pending() {
        let mut o = order(dec!(100));
        o.indeterminate = true;
        assert_eq!(
            apply_status_report(&mut o, &report(BrokerOrderStatus::Working)),
            Transition::Changed(OrderStatus::Submitted)
        );
        assert!(!o.indeterminate);
    }

    #[test]
    fn test_needs_attention_is_frozen() {
        let mut o = order(dec!(100));
        acknowledge(&mut o, 42, Utc::now());
        flag_attention(&mut o, Utc::now());

        let f = fill(&o, 1, dec!(1));
        assert!(matches!(apply_execution(&mut o, &f), Transition::Conflict(_)));
        assert!(matches!(
            apply_status_report(&mut o, &report(BrokerOrderStatus::Cancelled)),
            Transition::Conflict(_)
        ));
        assert!(matches!(confirm_cancel(&mut o, Utc::now()), Transition::Conflict(_)));
    }
}
