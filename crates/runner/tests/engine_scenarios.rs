//! End-to-end engine scenarios against the paper broker
//!
//! Each test runs the full coordinator loop: ticks go in through the paper
//! broker, intents come out of a scripted strategy, and the assertions look
//! at engine events, the ledger and the broker's own book.

use chrono::Utc;
use meridian_clock::SystemClock;
use meridian_core::{
    InstrumentKey, MarketSnapshot, OrderStatus, Position, Side, TickField, TradeIntent,
};
use meridian_gateway::{ConnectionParams, PaperBroker, TickMessage};
use meridian_order_manager::{ShutdownPolicy, ShutdownReport};
use meridian_risk_manager::{RiskCheck, RiskLimits};
use meridian_runner::{
    ConfigError, EngineConfig, EngineCoordinator, EngineError, EngineEvent, EngineOptions,
};
use meridian_strategy::{PriceHistory, Strategy, StrategyError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn aapl() -> InstrumentKey {
    InstrumentKey::stock("AAPL")
}

/// Emits the queued trades, one per evaluation
struct Scripted {
    trades: Mutex<VecDeque<(Side, Decimal)>>,
}

impl Scripted {
    fn new(trades: &[(Side, Decimal)]) -> Arc<Self> {
        Arc::new(Self {
            trades: Mutex::new(trades.iter().copied().collect()),
        })
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn instruments(&self) -> Vec<InstrumentKey> {
        vec![aapl()]
    }

    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        _position: &Position,
        _history: &PriceHistory,
    ) -> Result<Option<TradeIntent>, StrategyError> {
        Ok(self.trades.lock().pop_front().map(|(side, quantity)| {
            TradeIntent::delta(snapshot.instrument.clone(), side, quantity, "scripted", Utc::now())
        }))
    }
}

fn config(limits: RiskLimits) -> EngineConfig {
    let mut config = EngineConfig::new(ConnectionParams::local("DU1"))
        .with_instrument(aapl())
        .with_risk(limits);
    config.backoff.initial_ms = 10;
    config.backoff.jitter = false;
    config.orders.drain_timeout_ms = 2_000;
    config
}

struct Engine {
    broker: Arc<PaperBroker>,
    coordinator: Arc<EngineCoordinator>,
    events: broadcast::Receiver<EngineEvent>,
    run: JoinHandle<meridian_runner::Result<ShutdownReport>>,
}

async fn launch(broker: PaperBroker, config: EngineConfig, trades: &[(Side, Decimal)]) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    let broker = Arc::new(broker);

    let coordinator = Arc::new(
        EngineCoordinator::new(
            config,
            EngineOptions::default(),
            broker.clone(),
            SystemClock::shared(),
        )
        .expect("engine config"),
    );
    coordinator
        .register_strategy(Scripted::new(trades))
        .expect("register");
    let events = coordinator.events();
    coordinator.start().await.expect("start");

    let runner = coordinator.clone();
    let run = tokio::spawn(async move { runner.run().await });

    Engine {
        broker,
        coordinator,
        events,
        run,
    }
}

impl Engine {
    fn last(&self, price: Decimal) {
        let tick = TickMessage::new(aapl(), TickField::Last, price, Utc::now());
        assert!(self.broker.publish_tick(tick), "tick not delivered");
    }

    /// Next event matching `pick`
    async fn wait_for<T>(&mut self, mut pick: impl FnMut(&EngineEvent) -> Option<T>) -> T {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        if let Some(found) = pick(&event) {
                            return found;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    async fn wait_for_position(&self, quantity: Decimal) {
        tokio::time::timeout(WAIT, async {
            while self.coordinator.ledger().get_position(&aapl()).quantity != quantity {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for position");
    }

    async fn stop(self, policy: ShutdownPolicy) -> ShutdownReport {
        self.coordinator.shutdown(policy);
        tokio::time::timeout(WAIT, self.run)
            .await
            .expect("engine did not stop")
            .expect("engine task panicked")
            .expect("engine failed")
    }
}

fn submitted(event: &EngineEvent) -> Option<(Side, Decimal)> {
    match event {
        EngineEvent::OrderSubmitted { side, quantity, .. } => Some((*side, *quantity)),
        _ => None,
    }
}

#[tokio::test]
async fn test_oversized_intent_is_rescaled_and_filled() {
    let limits = RiskLimits {
        max_position: dec!(500),
        ..Default::default()
    };
    let mut engine = launch(
        PaperBroker::new(dec!(1000000)).with_auto_fill(true),
        config(limits),
        &[(Side::Buy, dec!(1000))],
    )
    .await;

    engine.last(dec!(100));
    let (side, quantity) = engine.wait_for(submitted).await;
    assert_eq!(side, Side::Buy);
    assert_eq!(quantity, dec!(500));

    engine.wait_for_position(dec!(500)).await;
    assert_eq!(engine.broker.position(&aapl()), dec!(500));
    assert_eq!(engine.coordinator.stats().submitted, 1);

    engine.stop(ShutdownPolicy::LeaveOpen).await;
}

#[tokio::test]
async fn test_daily_loss_blocks_new_risk_but_allows_closing() {
    let limits = RiskLimits {
        max_daily_loss: dec!(1000),
        ..Default::default()
    };
    let broker = PaperBroker::new(dec!(100000)).with_auto_fill(true);
    broker.set_position(aapl(), dec!(100), dec!(100));
    let mut engine = launch(
        broker,
        config(limits),
        &[(Side::Buy, dec!(10)), (Side::Sell, dec!(100))],
    )
    .await;
    assert_eq!(engine.coordinator.ledger().get_position(&aapl()).quantity, dec!(100));

    // Down 2000 on the carried position
    engine.last(dec!(80));
    let rejection = engine
        .wait_for(|e| match e {
            EngineEvent::IntentRejected { rejection, .. } => Some(rejection.clone()),
            _ => None,
        })
        .await;
    assert_eq!(rejection.reason, RiskCheck::DailyLossLimit);
    assert!(engine.coordinator.risk().is_halted());

    engine.last(dec!(80));
    let (side, quantity) = engine.wait_for(submitted).await;
    assert_eq!((side, quantity), (Side::Sell, dec!(100)));

    engine.wait_for_position(Decimal::ZERO).await;
    let stats = engine.coordinator.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.submitted, 1);

    engine.stop(ShutdownPolicy::LeaveOpen).await;
}

#[tokio::test]
async fn test_fill_while_disconnected_is_reconciled_once() {
    let mut engine = launch(
        PaperBroker::new(dec!(100000)),
        config(RiskLimits::default()),
        &[(Side::Buy, dec!(10))],
    )
    .await;

    engine.last(dec!(100));
    let order_id = engine
        .wait_for(|e| match e {
            EngineEvent::OrderSubmitted { order_id, .. } => Some(*order_id),
            _ => None,
        })
        .await;
    let broker_id = engine
        .coordinator
        .orders()
        .get_order(order_id)
        .await
        .and_then(|o| o.broker_order_id)
        .expect("acknowledged");

    engine.broker.drop_connection("network");
    engine.broker.fill(broker_id, dec!(10), dec!(101)).await.unwrap();

    engine
        .wait_for(|e| matches!(e, EngineEvent::ConnectionRestored { .. }).then_some(()))
        .await;

    let order = engine.coordinator.orders().get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    let position = engine.coordinator.ledger().get_position(&aapl());
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.average_cost, dec!(101));
    assert_eq!(position.fill_count, 1);

    engine.stop(ShutdownPolicy::LeaveOpen).await;
}

#[tokio::test]
async fn test_shutdown_flatten_closes_everything() {
    let mut engine = launch(
        PaperBroker::new(dec!(100000)).with_auto_fill(true),
        config(RiskLimits::default()),
        &[(Side::Buy, dec!(30))],
    )
    .await;

    engine.last(dec!(100));
    engine.wait_for(submitted).await;
    engine.wait_for_position(dec!(30)).await;

    let coordinator = engine.coordinator.clone();
    let broker = engine.broker.clone();
    let report = engine.stop(ShutdownPolicy::Flatten).await;

    assert_eq!(report.flatten_orders.len(), 1);
    assert!(report.failures.is_empty());
    assert!(coordinator.ledger().get_position(&aapl()).is_flat());
    assert_eq!(broker.position(&aapl()), Decimal::ZERO);
    assert!(coordinator.orders().open_orders().await.is_empty());
    assert!(!coordinator.connection().is_connected());
}

#[tokio::test]
async fn test_shutdown_before_run_and_single_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let broker = Arc::new(PaperBroker::new(dec!(100000)));
    let coordinator = EngineCoordinator::new(
        config(RiskLimits::default()),
        EngineOptions::default(),
        broker,
        SystemClock::shared(),
    )
    .unwrap();
    coordinator.start().await.unwrap();

    coordinator.shutdown(ShutdownPolicy::CancelOpen);
    assert!(!coordinator.strategies().is_accepting());
    let report = tokio::time::timeout(WAIT, coordinator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report, ShutdownReport::default());

    assert!(matches!(coordinator.run().await, Err(EngineError::AlreadyRunning)));
}

#[tokio::test]
async fn test_invalid_config_is_refused() {
    let broker = Arc::new(PaperBroker::new(dec!(100000)));
    let empty = EngineConfig::new(ConnectionParams::local("DU1"));
    assert!(matches!(
        EngineCoordinator::new(
            empty,
            EngineOptions::default(),
            broker,
            SystemClock::shared(),
        ),
        Err(EngineError::Config(ConfigError::NoInstruments))
    ));
}
