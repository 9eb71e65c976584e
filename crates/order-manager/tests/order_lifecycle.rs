//! Integration tests: OrderManager <-> ConnectionManager <-> PaperBroker
//!
//! Drives orders through the real broker link and checks the lifecycle,
//! ledger feed and reconciliation behavior the engine relies on.

use chrono::Duration as ChronoDuration;
use meridian_clock::{Clock, ManualClock};
use meridian_core::{InstrumentKey, Order, OrderStatus, OrderType, Side};
use meridian_gateway::{
    AckMode, BackoffPolicy, BrokerStreams, ClientIdRegistry, ConnectionEvent, ConnectionManager,
    ConnectionParams, PaperBroker, QueueCapacities,
};
use meridian_ledger::Ledger;
use meridian_order_manager::{
    EventOutcome, OrderError, OrderManager, OrderManagerConfig, OrderNotice, ShutdownPolicy,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    broker: Arc<PaperBroker>,
    connection: Arc<ConnectionManager>,
    streams: BrokerStreams,
    ledger: Arc<Ledger>,
    clock: Arc<ManualClock>,
    oms: OrderManager,
}

async fn harness(broker: PaperBroker) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let broker = Arc::new(broker);
    let backoff = BackoffPolicy {
        initial: Duration::from_millis(10),
        ..Default::default()
    };
    let (connection, streams) = ConnectionManager::new(
        broker.clone(),
        backoff,
        QueueCapacities::default(),
        ClientIdRegistry::new(),
    );
    connection
        .connect(ConnectionParams::local("DU1"))
        .await
        .expect("paper connect");

    let clock = ManualClock::starting_now();
    let ledger = Arc::new(Ledger::new("DU1", clock.now()));
    let oms = OrderManager::new(
        OrderManagerConfig {
            account: "DU1".into(),
            ..Default::default()
        },
        connection.clone(),
        ledger.clone(),
        clock.clone(),
    );

    Harness {
        broker,
        connection,
        streams,
        ledger,
        clock,
        oms,
    }
}

impl Harness {
    /// Feed every queued order event to the order manager
    async fn pump(&mut self) -> Vec<EventOutcome> {
        let mut outcomes = Vec::new();
        for event in self.streams.orders.drain() {
            outcomes.push(self.oms.on_order_event(event).await);
        }
        outcomes
    }
}

fn aapl() -> InstrumentKey {
    InstrumentKey::stock("AAPL")
}

fn buy(qty: Decimal) -> Order {
    Order::new(aapl(), Side::Buy, OrderType::Market, qty, "test", chrono::Utc::now())
}

#[tokio::test]
async fn test_partial_fills_with_redelivery_count_once() {
    let mut h = harness(PaperBroker::new(dec!(100000))).await;

    let order = h.oms.submit(buy(dec!(100))).await.unwrap();
    let broker_id = order.broker_order_id.unwrap();

    h.broker.fill(broker_id, dec!(50), dec!(10)).await.unwrap();
    h.broker.fill(broker_id, dec!(50), dec!(11)).await.unwrap();
    assert!(h.broker.redeliver_execution(order.id, 1).await);
    let outcomes = h.pump().await;

    assert!(outcomes.contains(&EventOutcome::Duplicate));
    let stored = h.oms.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);
    assert_eq!(stored.filled_quantity, dec!(100));
    assert_eq!(stored.avg_fill_price, Some(dec!(10.5)));
    assert!(stored.visited(OrderStatus::PartiallyFilled));

    let position = h.ledger.get_position(&aapl());
    assert_eq!(position.quantity, dec!(100));
    assert_eq!(position.average_cost, dec!(10.5));
}

#[tokio::test]
async fn test_fill_during_disconnect_is_recovered_by_reconcile() {
    let mut h = harness(PaperBroker::new(dec!(100000))).await;
    let mut events = h.connection.events();

    let order = h.oms.submit(buy(dec!(100))).await.unwrap();
    assert_eq!(order.status, OrderStatus::Submitted);
    let broker_id = order.broker_order_id.unwrap();

    h.broker.drop_connection("network");
    // Executed at the broker while the link is down: no event reaches us
    h.broker.fill(broker_id, dec!(100), dec!(10)).await.unwrap();

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for reconnect")
            .unwrap();
        if matches!(event, ConnectionEvent::Restored { .. }) {
            break;
        }
    }
    assert!(h.pump().await.is_empty());
    assert_eq!(h.ledger.get_position(&aapl()).quantity, Decimal::ZERO);

    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.executions_applied, 1);
    assert!(report.mismatches.is_empty());

    let stored = h.oms.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);
    assert_eq!(h.ledger.get_position(&aapl()).quantity, dec!(100));

    // A late push of the same execution changes nothing
    assert!(h.broker.redeliver_execution(order.id, 1).await);
    assert_eq!(h.pump().await, vec![EventOutcome::Duplicate]);
    assert_eq!(h.ledger.get_position(&aapl()).quantity, dec!(100));

    // Second pass is a no-op
    let again = h.oms.reconcile().await.unwrap();
    assert_eq!(again.executions_applied, 0);
    assert_eq!(again.updated, 0);
}

#[tokio::test(start_paused = true)]
async fn test_withheld_ack_becomes_indeterminate_then_reconciles() {
    let h = harness(PaperBroker::new(dec!(100000))).await;
    h.broker.set_ack_mode(AckMode::Withhold);

    let order = buy(dec!(10));
    let id = order.id;
    let err = h.oms.submit(order).await.unwrap_err();
    assert!(matches!(err, OrderError::AckTimeout { .. }));

    let stored = h.oms.get_order(id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(stored.indeterminate);
    assert!(h.oms.take_reconcile_request());
    // Submitted exactly once
    assert_eq!(h.broker.received_orders().len(), 1);

    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.updated, 1);

    let stored = h.oms.get_order(id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Submitted);
    assert!(!stored.indeterminate);
    assert_eq!(stored.broker_order_id, h.broker.broker_id_for(id));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_order_is_marked_lost_after_grace() {
    let h = harness(PaperBroker::new(dec!(100000))).await;
    h.broker.set_ack_mode(AckMode::Drop);

    let order = buy(dec!(10));
    let id = order.id;
    assert!(h.oms.submit(order).await.is_err());

    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.awaiting, 1);
    assert!(report.lost.is_empty());

    h.clock.advance(ChronoDuration::seconds(60));
    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.lost, vec![id]);

    let stored = h.oms.get_order(id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Rejected);
    assert_eq!(stored.reject_reason.as_deref(), Some("lost on reconnect"));
    assert!(h.oms.open_orders().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_long_lived_order_gets_full_grace_once_missing() {
    let h = harness(PaperBroker::new(dec!(100000))).await;
    h.broker.set_ack_mode(AckMode::Drop);

    let order = buy(dec!(10));
    let id = order.id;
    assert!(h.oms.submit(order).await.is_err());
    assert!(h.oms.take_reconcile_request());

    // Untouched for a long time before the first reconcile
    h.clock.advance(ChronoDuration::minutes(10));
    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.awaiting, 1);
    assert!(report.lost.is_empty());
    assert!(h.oms.take_reconcile_request());

    h.clock.advance(ChronoDuration::seconds(11));
    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.lost, vec![id]);
    assert!(!h.oms.take_reconcile_request());
    assert_eq!(h.oms.pending_quantity(&aapl()).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_reconcile_flags_filled_quantity_mismatch() {
    let mut h = harness(PaperBroker::new(dec!(100000))).await;
    let mut events = h.connection.events();
    let mut notices = h.oms.notices();

    let order = h.oms.submit(buy(dec!(100))).await.unwrap();
    let broker_id = order.broker_order_id.unwrap();

    h.broker.drop_connection("network");
    h.broker.fill(broker_id, dec!(40), dec!(10)).await.unwrap();
    // The broker no longer returns the execution, only the order's totals
    assert_eq!(h.broker.expire_executions(), 1);

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for reconnect")
            .unwrap();
        if matches!(event, ConnectionEvent::Restored { .. }) {
            break;
        }
    }
    assert!(h.pump().await.is_empty());

    let report = h.oms.reconcile().await.unwrap();
    assert_eq!(report.executions_applied, 0);
    assert_eq!(report.mismatches.len(), 1);
    let mismatch = &report.mismatches[0];
    assert_eq!(mismatch.order_id, order.id);
    assert_eq!(mismatch.broker_order_id, Some(broker_id));
    assert_eq!(mismatch.local_filled, Decimal::ZERO);
    assert_eq!(mismatch.broker_filled, dec!(40));

    let stored = h.oms.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::NeedsAttention);
    assert_eq!(
        notices.recv().await.unwrap(),
        OrderNotice::NeedsAttention(mismatch.clone())
    );
    assert_eq!(h.ledger.get_position(&aapl()).quantity, Decimal::ZERO);
}

#[tokio::test]
async fn test_cancel_loses_race_to_fill() {
    let mut h = harness(PaperBroker::new(dec!(100000))).await;

    let order = h.oms.submit(buy(dec!(10))).await.unwrap();
    let broker_id = order.broker_order_id.unwrap();

    // Filled at the broker, events not yet processed
    h.broker.fill(broker_id, dec!(10), dec!(10)).await.unwrap();
    assert!(matches!(h.oms.cancel(order.id).await, Err(OrderError::Connection(_))));

    h.pump().await;
    let stored = h.oms.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);
    assert!(!stored.visited(OrderStatus::Cancelled));
    assert_eq!(h.ledger.get_position(&aapl()).quantity, dec!(10));
}

#[tokio::test]
async fn test_cancel_confirmed_by_broker() {
    let mut h = harness(PaperBroker::new(dec!(100000))).await;

    let order = h.oms.submit(buy(dec!(10))).await.unwrap();
    h.oms.cancel(order.id).await.unwrap();

    // Still working until the broker says otherwise
    assert_eq!(
        h.oms.get_order(order.id).await.unwrap().status,
        OrderStatus::Submitted
    );
    assert_eq!(
        h.pump().await,
        vec![EventOutcome::Updated(OrderStatus::Cancelled)]
    );
    assert_eq!(h.oms.pending_quantity(&aapl()).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_auto_filled_market_order() {
    let mut h = harness(PaperBroker::new(dec!(100000)).with_auto_fill(true)).await;
    h.broker.set_price(aapl(), dec!(150));

    let order = h.oms.submit(buy(dec!(20))).await.unwrap();
    // Execution was pushed before the acknowledgment returned
    assert_eq!(order.status, OrderStatus::Submitted);

    h.pump().await;
    let stored = h.oms.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Filled);
    assert_eq!(h.ledger.get_position(&aapl()).quantity, dec!(20));
}

#[tokio::test]
async fn test_submit_while_disconnected_rejects_locally() {
    let h = harness(PaperBroker::new(dec!(100000))).await;
    h.connection.disconnect().await;

    let order = buy(dec!(10));
    let id = order.id;
    assert!(matches!(h.oms.submit(order).await, Err(OrderError::Connection(_))));
    assert_eq!(
        h.oms.get_order(id).await.unwrap().status,
        OrderStatus::Rejected
    );
    assert!(h.broker.received_orders().is_empty());
}

#[tokio::test]
async fn test_shutdown_flatten_closes_positions() {
    let mut h = harness(PaperBroker::new(dec!(100000)).with_auto_fill(true)).await;
    h.broker.set_price(aapl(), dec!(100));

    h.oms.submit(buy(dec!(30))).await.unwrap();
    h.pump().await;
    assert_eq!(h.ledger.get_position(&aapl()).quantity, dec!(30));

    // A resting limit order that the shutdown must cancel
    let resting = Order::new(aapl(), Side::Buy, OrderType::Limit, dec!(5), "test", chrono::Utc::now())
        .with_limit_price(dec!(90));
    let resting = h.oms.submit(resting).await.unwrap();

    let report = h.oms.shutdown(ShutdownPolicy::Flatten, Duration::from_secs(1)).await;
    assert_eq!(report.cancelled, vec![resting.id]);
    assert_eq!(report.flatten_orders.len(), 1);
    assert!(report.failures.is_empty());
    assert!(!h.oms.is_accepting());

    h.pump().await;
    assert!(h.ledger.get_position(&aapl()).is_flat());
    assert_eq!(h.broker.position(&aapl()), Decimal::ZERO);
}

#[tokio::test]
async fn test_shutdown_leave_open_keeps_orders() {
    let h = harness(PaperBroker::new(dec!(100000))).await;
    let order = h.oms.submit(buy(dec!(10))).await.unwrap();

    let report = h.oms.shutdown(ShutdownPolicy::LeaveOpen, Duration::from_secs(1)).await;
    assert_eq!(report.left_open, vec![order.id]);
    assert!(report.cancelled.is_empty());
    assert!(matches!(
        h.oms.submit(buy(dec!(1))).await,
        Err(OrderError::NotAccepting)
    ));
}
