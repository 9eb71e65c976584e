//! Engine Coordinator
//!
//! Wires the components into one event loop and owns the engine lifecycle:
//! - `start()`: connect, subscribe, seed the ledger, reconcile orders
//! - `run()`: process broker streams, link events and strategy timers until
//!   shutdown is requested or the link fails for good
//! - `shutdown(policy)`: stop taking intents now; the loop then drains
//!   in-flight submissions, applies the policy and disconnects

use chrono::NaiveDate;
use log::{debug, error, info, warn};
use meridian_core::{InstrumentKey, OrderId, Side};
use meridian_gateway::{
    AccountEvent, BrokerSession, BrokerStreams, ClientIdRegistry, ConnectionEvent,
    ConnectionHandle, ConnectionManager, TickMessage, Topic,
};
use meridian_ledger::{Ledger, PositionMismatch};
use meridian_market_data::{MarketDataHub, TickOutcome};
use meridian_order_manager::{
    OrderManager, OrderManagerConfig, OrderNotice, ReconcileReport, ShutdownPolicy,
    ShutdownReport, TradingMode,
};
use meridian_ports::Clock;
use meridian_risk_manager::{RiskContext, RiskDecision, RiskManager, RiskRejection};
use meridian_strategy::{EvaluationCadence, PriceBand, Strategy, StrategyEngine};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, Result};

/// How often reconcile requests and the trading-day rollover are checked
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(1);

/// Operator choices that do not belong in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    pub mode: TradingMode,
    /// Live orders are refused unless this is set
    pub live_confirmed: bool,
}

/// Operator notifications
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started {
        session: u64,
    },
    ConnectionLost {
        reason: String,
    },
    ConnectionRestored {
        session: u64,
    },
    Reconciled(ReconcileReport),
    PositionMismatch(PositionMismatch),
    OrderSubmitted {
        order_id: OrderId,
        strategy: String,
        instrument: InstrumentKey,
        side: Side,
        quantity: Decimal,
    },
    IntentRejected {
        strategy: String,
        instrument: InstrumentKey,
        rejection: RiskRejection,
    },
    /// Dropped without a risk decision (link down)
    IntentDropped {
        strategy: String,
        instrument: InstrumentKey,
        reason: String,
    },
    SubmissionFailed {
        strategy: String,
        instrument: InstrumentKey,
        error: String,
    },
    TradingHalted {
        reason: String,
    },
    Order(OrderNotice),
    Fatal {
        reason: String,
    },
    Stopped(ShutdownReport),
}

/// Intent flow counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub intents: u64,
    pub submitted: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub failed: u64,
}

pub struct EngineCoordinator {
    config: EngineConfig,
    options: EngineOptions,
    clock: Arc<dyn Clock>,
    connection: Arc<ConnectionManager>,
    streams: Mutex<Option<BrokerStreams>>,
    hub: Arc<MarketDataHub>,
    ledger: Arc<Ledger>,
    strategies: Arc<StrategyEngine>,
    risk: Arc<RiskManager>,
    orders: Arc<OrderManager>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: watch::Sender<Option<ShutdownPolicy>>,
    /// Broker link up; intents are dropped while it is down
    link_up: AtomicBool,
    halt_reported: AtomicBool,
    trading_day: Mutex<NaiveDate>,
    intents: AtomicU64,
    submitted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl EngineCoordinator {
    /// Build every component from `config`
    ///
    /// Price band strategies listed in the config are registered here; more
    /// can be added with [`EngineCoordinator::register_strategy`] before `start`.
    pub fn new(
        config: EngineConfig,
        options: EngineOptions,
        session: Arc<dyn BrokerSession>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let (connection, streams) = ConnectionManager::new(
            session,
            config.backoff.policy(),
            config.queue_capacities(),
            ClientIdRegistry::new(),
        );
        let hub = Arc::new(MarketDataHub::new(clock.clone(), config.staleness()));
        let ledger = Arc::new(Ledger::new(config.connection.account.clone(), clock.now()));

        let strategies = Arc::new(StrategyEngine::new(config.strategy.engine_config()));
        for band in &config.strategy.price_band {
            strategies.register(Arc::new(PriceBand::new(band.clone())))?;
        }

        let risk = Arc::new(RiskManager::new(config.risk.clone()).map_err(ConfigError::from)?);
        let orders = Arc::new(OrderManager::new(
            OrderManagerConfig {
                account: config.connection.account.clone(),
                mode: options.mode,
                live_confirmed: options.live_confirmed,
                ack_timeout: config.orders.ack_timeout(),
                reconcile_grace: config.orders.reconcile_grace(),
            },
            connection.clone(),
            ledger.clone(),
            clock.clone(),
        ));

        let (events, _) = broadcast::channel(1024);
        let (shutdown, _) = watch::channel(None);
        let today = clock.now().date_naive();

        Ok(Self {
            config,
            options,
            clock,
            connection,
            streams: Mutex::new(Some(streams)),
            hub,
            ledger,
            strategies,
            risk,
            orders,
            events,
            shutdown,
            link_up: AtomicBool::new(false),
            halt_reported: AtomicBool::new(false),
            trading_day: Mutex::new(today),
            intents: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) -> Result<()> {
        self.strategies.register(strategy)?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn hub(&self) -> &Arc<MarketDataHub> {
        &self.hub
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn strategies(&self) -> &Arc<StrategyEngine> {
        &self.strategies
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            intents: self.intents.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No listeners is fine
        let _ = self.events.send(event);
    }

    // Lifecycle

    /// Connect, subscribe, seed the ledger from the broker and reconcile
    ///
    /// Authentication and parameter errors are returned as is; the first
    /// connect is not retried.
    pub async fn start(&self) -> Result<ConnectionHandle> {
        info!(
            "[ENGINE] Starting in {:?} mode for account {} ({} instrument(s), {} strateg(ies))",
            self.options.mode,
            self.config.connection.account,
            self.config.instruments.len(),
            self.strategies.strategies().len()
        );
        if self.options.mode == TradingMode::Live && !self.options.live_confirmed {
            warn!("[ENGINE] Live mode without confirmation: orders will be refused");
        }

        let handle = self.connection.connect(self.config.connection.clone()).await?;
        for topic in self.topics() {
            self.connection.subscribe(topic).await?;
        }
        self.link_up.store(true, Ordering::SeqCst);

        self.seed_ledger().await?;
        let report = self.orders.reconcile().await?;
        self.emit(EngineEvent::Reconciled(report));

        info!("[ENGINE] Started (session {})", handle.session);
        self.emit(EngineEvent::Started {
            session: handle.session,
        });
        Ok(handle)
    }

    /// Instruments the engine trades or watches
    fn instruments(&self) -> Vec<InstrumentKey> {
        let mut all = self.config.instruments.clone();
        for instrument in self.strategies.instruments() {
            if !all.contains(&instrument) {
                all.push(instrument);
            }
        }
        all
    }

    fn topics(&self) -> Vec<Topic> {
        let mut topics = vec![
            Topic::Orders,
            Topic::Account(self.config.connection.account.clone()),
        ];
        topics.extend(self.instruments().into_iter().map(Topic::MarketData));
        topics
    }

    async fn seed_ledger(&self) -> Result<()> {
        let summary = self.connection.account_summary().await?;
        self.ledger.apply_account_summary(&summary)?;

        let positions = self.connection.positions().await?;
        for report in &positions {
            self.ledger.restore_position(report)?;
        }
        let account = self.ledger.get_account_state();
        info!(
            "[ENGINE] Ledger seeded: cash {}, net liquidation {}, {} position(s)",
            account.cash_balance,
            account.net_liquidation,
            positions.len()
        );
        Ok(())
    }

    /// Request shutdown
    ///
    /// New intents stop immediately; the running loop finishes the rest.
    pub fn shutdown(&self, policy: ShutdownPolicy) {
        if self.strategies.is_accepting() {
            self.strategies.stop_accepting();
        }
        info!("[ENGINE] Shutdown requested ({:?})", policy);
        self.shutdown.send_replace(Some(policy));
    }

    /// Process events until shutdown or a fatal link failure
    pub async fn run(&self) -> Result<ShutdownReport> {
        let mut streams = self.streams.lock().take().ok_or(EngineError::AlreadyRunning)?;
        let mut link = self.connection.events();
        let mut notices = self.orders.notices();
        let mut shutdown = self.shutdown.subscribe();
        let mut cadence = self.strategies.cadence().period().map(|period| {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_PERIOD);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[ENGINE] Event loop running");
        let requested = *shutdown.borrow_and_update();

        let outcome: Result<ShutdownPolicy> = match requested {
            Some(policy) => Ok(policy),
            None => loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        let policy = match changed {
                            Ok(()) => *shutdown.borrow(),
                            Err(_) => Some(ShutdownPolicy::LeaveOpen),
                        };
                        if let Some(policy) = policy {
                            break Ok(policy);
                        }
                    }

                    event = link.recv() => match event {
                        Ok(event) => {
                            if let Err(e) = self.on_connection_event(event).await {
                                break Err(e);
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!("[ENGINE] Missed {} connection event(s)", missed);
                        }
                        Err(RecvError::Closed) => {
                            break Err(EngineError::Fatal("connection events closed".into()));
                        }
                    },

                    event = streams.orders.recv() => match event {
                        Ok(event) => {
                            self.orders.on_order_event(event).await;
                        }
                        Err(e) => break Err(EngineError::from(e)),
                    },

                    event = streams.account.recv() => match event {
                        Ok(event) => self.on_account_event(event),
                        Err(e) => break Err(EngineError::from(e)),
                    },

                    tick = streams.market.recv() => match tick {
                        Ok(tick) => self.on_tick(tick).await,
                        Err(e) => break Err(EngineError::from(e)),
                    },

                    _ = next_cadence(&mut cadence) => {
                        self.evaluate_all().await;
                    }

                    notice = notices.recv() => {
                        if let Ok(notice) = notice {
                            self.emit(EngineEvent::Order(notice));
                        }
                    }

                    _ = housekeeping.tick() => {
                        self.housekeeping().await;
                    }
                }
            },
        };

        match outcome {
            Ok(policy) => Ok(self.finish(policy, &mut streams).await),
            Err(e) => {
                error!("[ENGINE] Stopping: {}", e);
                self.emit(EngineEvent::Fatal {
                    reason: e.to_string(),
                });
                if self.strategies.is_accepting() {
                    self.strategies.stop_accepting();
                }
                // The link is gone; all that is left is to record what stays open
                let report = self.orders.shutdown(ShutdownPolicy::LeaveOpen, Duration::ZERO).await;
                self.connection.disconnect().await;
                self.emit(EngineEvent::Stopped(report));
                Err(e)
            }
        }
    }

    async fn finish(&self, policy: ShutdownPolicy, streams: &mut BrokerStreams) -> ShutdownReport {
        if self.strategies.is_accepting() {
            self.strategies.stop_accepting();
        }
        let drain = self.config.orders.drain_timeout();

        let report = self.orders.shutdown(policy, drain).await;
        self.settle(streams, drain, policy != ShutdownPolicy::LeaveOpen)
            .await;
        self.connection.disconnect().await;

        let open = self.orders.open_orders().await.len();
        let positions = self
            .ledger
            .positions()
            .iter()
            .filter(|p| !p.is_flat())
            .count();
        info!(
            "[ENGINE] Stopped ({:?}): {} open order(s), {} open position(s), daily P&L {}",
            policy,
            open,
            positions,
            self.ledger.daily_pnl()
        );
        self.emit(EngineEvent::Stopped(report.clone()));
        report
    }

    /// Apply events that arrive after the shutdown policy ran
    ///
    /// With `await_terminal` the wait lasts until no order is open or the
    /// limit passes; otherwise only what is already queued is applied.
    async fn settle(&self, streams: &mut BrokerStreams, limit: Duration, await_terminal: bool) {
        let deadline = Instant::now() + limit;
        loop {
            for event in streams.orders.drain() {
                self.orders.on_order_event(event).await;
            }
            for event in streams.account.drain() {
                self.on_account_event(event);
            }
            if !await_terminal
                || self.orders.open_orders().await.is_empty()
                || Instant::now() >= deadline
            {
                break;
            }
            match tokio::time::timeout_at(deadline, streams.orders.recv()).await {
                Ok(Ok(event)) => {
                    self.orders.on_order_event(event).await;
                }
                _ => break,
            }
        }
    }

    // Broker link

    async fn on_connection_event(&self, event: ConnectionEvent) -> Result<()> {
        match event {
            ConnectionEvent::Lost { reason } => {
                self.link_up.store(false, Ordering::SeqCst);
                let queued = self.strategies.drain_intents();
                warn!(
                    "[ENGINE] Broker link lost ({}); order submission paused, {} queued intent(s) dropped",
                    reason,
                    queued.len()
                );
                for intent in queued {
                    self.drop_intent(&intent.strategy_id, &intent.instrument, "broker link down");
                }
                self.emit(EngineEvent::ConnectionLost { reason });
            }
            ConnectionEvent::Restored { handle, attempts } => {
                info!(
                    "[ENGINE] Broker link restored after {} attempt(s), reconciling",
                    attempts
                );
                self.resync().await;
                self.link_up.store(true, Ordering::SeqCst);
                info!("[ENGINE] Order submission resumed");
                self.emit(EngineEvent::ConnectionRestored {
                    session: handle.session,
                });
            }
            ConnectionEvent::Fatal { reason } => {
                return Err(EngineError::Fatal(reason));
            }
        }
        Ok(())
    }

    /// Re-sync orders, positions and account after a reconnect
    async fn resync(&self) {
        match self.orders.reconcile().await {
            Ok(report) => self.emit(EngineEvent::Reconciled(report)),
            Err(e) => {
                warn!("[ENGINE] Order reconciliation failed: {}", e);
                return;
            }
        }

        match self.connection.positions().await {
            Ok(reports) => {
                for mismatch in self.ledger.reconcile_positions(&reports) {
                    error!(
                        "[ENGINE] Position mismatch for {}: ledger {}, broker {}",
                        mismatch.instrument, mismatch.ledger_quantity, mismatch.broker_quantity
                    );
                    self.emit(EngineEvent::PositionMismatch(mismatch));
                }
            }
            Err(e) => warn!("[ENGINE] Could not fetch positions: {}", e),
        }

        match self.connection.account_summary().await {
            Ok(summary) => {
                if let Err(e) = self.ledger.apply_account_summary(&summary) {
                    warn!("[ENGINE] Account summary refused: {}", e);
                }
            }
            Err(e) => warn!("[ENGINE] Could not fetch account summary: {}", e),
        }
    }

    fn on_account_event(&self, event: AccountEvent) {
        match event {
            AccountEvent::Summary(summary) => {
                if let Err(e) = self.ledger.apply_account_summary(&summary) {
                    warn!("[ENGINE] Account summary refused: {}", e);
                }
            }
            // Positions move on executions; broker position pushes are only
            // compared at reconnect
            AccountEvent::Position(report) => {
                debug!(
                    "[ENGINE] Broker position {} {} @ {}",
                    report.instrument, report.quantity, report.average_cost
                );
            }
        }
    }

    // Market data and strategies

    async fn on_tick(&self, tick: TickMessage) {
        let outcome = self
            .hub
            .on_tick(&tick.instrument, tick.field, tick.value, tick.timestamp);
        if !matches!(outcome, TickOutcome::Applied { .. }) || !tick.field.is_price() {
            return;
        }

        if let Some(mark) = self
            .hub
            .get_snapshot(&tick.instrument)
            .and_then(|s| s.mark_price())
        {
            self.ledger.mark(&tick.instrument, mark);
        }

        if self.strategies.cadence() == EvaluationCadence::OnUpdate {
            self.evaluate_instrument(&tick.instrument).await;
            self.process_intents().await;
        }
    }

    async fn evaluate_all(&self) {
        for instrument in self.instruments() {
            self.evaluate_instrument(&instrument).await;
        }
        self.process_intents().await;
    }

    async fn evaluate_instrument(&self, instrument: &InstrumentKey) {
        let Some(snapshot) = self.hub.get_snapshot(instrument) else {
            return;
        };
        let position = self.ledger.get_position(instrument);
        let report = self.strategies.evaluate(&snapshot, &position).await;
        if !report.failed.is_empty() {
            warn!(
                "[ENGINE] Strategies failed on {}: {}",
                instrument,
                report.failed.join(", ")
            );
        }
    }

    /// Hand queued intents to risk, then submit what risk allows
    async fn process_intents(&self) {
        self.risk.begin_cycle();

        while let Some(intent) = self.strategies.next_intent() {
            self.intents.fetch_add(1, Ordering::Relaxed);

            if !self.link_up.load(Ordering::SeqCst) {
                self.drop_intent(&intent.strategy_id, &intent.instrument, "broker link down");
                continue;
            }

            let ctx = self.risk_context(&intent.instrument).await;
            let decision = self.risk.evaluate(&intent, &ctx);
            self.report_halt();

            match &decision {
                RiskDecision::Reject(rejection) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "[ENGINE] {} intent for {} rejected: {}",
                        intent.strategy_id, intent.instrument, rejection
                    );
                    self.emit(EngineEvent::IntentRejected {
                        strategy: intent.strategy_id.clone(),
                        instrument: intent.instrument.clone(),
                        rejection: rejection.clone(),
                    });
                    continue;
                }
                RiskDecision::Rescale {
                    quantity, reason, ..
                } => {
                    info!(
                        "[ENGINE] {} intent for {} rescaled to {} ({})",
                        intent.strategy_id, intent.instrument, quantity, reason
                    );
                }
                RiskDecision::Approve { .. } => {}
            }

            match self.orders.submit_intent(&intent, &decision).await {
                Ok(order) => {
                    self.submitted.fetch_add(1, Ordering::Relaxed);
                    self.emit(EngineEvent::OrderSubmitted {
                        order_id: order.id,
                        strategy: order.strategy_id,
                        instrument: order.instrument,
                        side: order.side,
                        quantity: order.quantity,
                    });
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "[ENGINE] {} order for {} not placed: {}",
                        intent.strategy_id, intent.instrument, e
                    );
                    self.emit(EngineEvent::SubmissionFailed {
                        strategy: intent.strategy_id.clone(),
                        instrument: intent.instrument.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn risk_context(&self, instrument: &InstrumentKey) -> RiskContext {
        RiskContext {
            position: self.ledger.get_position(instrument),
            pending_quantity: self.orders.pending_quantity(instrument).await,
            account: self.ledger.get_account_state(),
            daily_pnl: self.ledger.daily_pnl(),
            gross_exposure: self.ledger.gross_exposure(),
            mark_price: self
                .hub
                .get_snapshot(instrument)
                .and_then(|s| s.mark_price()),
            now: self.clock.now(),
        }
    }

    fn drop_intent(&self, strategy: &str, instrument: &InstrumentKey, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        info!("[ENGINE] Dropped {} intent for {}: {}", strategy, instrument, reason);
        self.emit(EngineEvent::IntentDropped {
            strategy: strategy.to_string(),
            instrument: instrument.clone(),
            reason: reason.to_string(),
        });
    }

    fn report_halt(&self) {
        match self.risk.halt_reason() {
            Some(reason) => {
                if !self.halt_reported.swap(true, Ordering::SeqCst) {
                    self.emit(EngineEvent::TradingHalted { reason });
                }
            }
            None => self.halt_reported.store(false, Ordering::SeqCst),
        }
    }

    // Housekeeping

    async fn housekeeping(&self) {
        if self.orders.take_reconcile_request() {
            if self.link_up.load(Ordering::SeqCst) {
                match self.orders.reconcile().await {
                    Ok(report) => self.emit(EngineEvent::Reconciled(report)),
                    Err(e) => warn!("[ENGINE] Requested reconciliation failed: {}", e),
                }
            } else {
                debug!("[ENGINE] Reconciliation deferred until the link is back");
            }
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let rolled = {
            let mut day = self.trading_day.lock();
            if *day != today {
                *day = today;
                true
            } else {
                false
            }
        };
        if rolled {
            info!("[ENGINE] New trading day {}", today);
            self.ledger.reset_daily(now);
            self.risk.reset_daily();
            self.report_halt();
        }
    }
}

async fn next_cadence(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
