//! Paper broker
//!
//! In-process `BrokerSession` that keeps its own book of orders, executions,
//! positions and cash. Used for paper trading and as the broker in tests,
//! where its controls script the awkward cases: refused connects, dropped
//! links, withheld acknowledgments, partial fills and re-delivered
//! executions.
//!
//! Market orders (and limit orders marketable against the last price) fill
//! immediately when auto-fill is on; everything else waits for [`PaperBroker::fill`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use meridian_core::{
    BrokerOrderId, Fill, InstrumentKey, OrderId, OrderType, Position, Side, TickField,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::connection::{BrokerEventSink, BrokerSession, ConnectionParams};
use crate::error::ConnectionError;
use crate::messages::{
    AccountEvent, AccountSummary, AccountTag, BrokerOrderStatus, CancelRequest, OrderAck,
    OrderEvent, OrderRequest, OrderStatusReport, PositionReport, TickMessage,
};
use crate::transport::Topic;

/// Maintenance margin charged on gross notional
const MARGIN_RATE: Decimal = dec!(0.25);

/// How the paper broker answers order submissions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Accept and return a broker order id
    #[default]
    Accept,
    /// Reject with this reason
    Reject(String),
    /// Accept on the broker side but never answer the caller
    Withhold,
    /// Lose the request entirely: no broker record, no answer
    Drop,
}

struct PaperOrder {
    request: OrderRequest,
    report: OrderStatusReport,
    executions: u64,
}

struct State {
    connected: bool,
    sink: Option<BrokerEventSink>,
    account: String,
    subscriptions: BTreeSet<Topic>,
    connect_failures: VecDeque<ConnectionError>,
    connects: u32,
    ack_mode: AckMode,
    auto_fill: bool,
    next_broker_id: BrokerOrderId,
    orders: BTreeMap<BrokerOrderId, PaperOrder>,
    executions: Vec<Fill>,
    positions: BTreeMap<InstrumentKey, Position>,
    prices: HashMap<InstrumentKey, Decimal>,
    cash: Decimal,
}

/// Events to push once the state lock is released
#[derive(Default)]
struct Outbox {
    sink: Option<BrokerEventSink>,
    orders: Vec<OrderEvent>,
    account: Vec<AccountEvent>,
}

impl Outbox {
    async fn flush(self) {
        let Some(sink) = self.sink else {
            return;
        };
        for event in self.orders {
            if let Err(e) = sink.order_event(event).await {
                warn!("[PAPER] Dropped order event: {}", e);
            }
        }
        for event in self.account {
            if let Err(e) = sink.account_event(event).await {
                warn!("[PAPER] Dropped account event: {}", e);
            }
        }
    }
}

pub struct PaperBroker {
    state: Mutex<State>,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(State {
                connected: false,
                sink: None,
                account: String::new(),
                subscriptions: BTreeSet::new(),
                connect_failures: VecDeque::new(),
                connects: 0,
                ack_mode: AckMode::Accept,
                auto_fill: false,
                next_broker_id: 1,
                orders: BTreeMap::new(),
                executions: Vec::new(),
                positions: BTreeMap::new(),
                prices: HashMap::new(),
                cash: starting_cash,
            }),
        }
    }

    /// Fill marketable orders as soon as they are accepted
    pub fn with_auto_fill(self, auto_fill: bool) -> Self {
        self.state.lock().auto_fill = auto_fill;
        self
    }

    // Controls

    /// The next connect attempts fail with these errors, in order
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = ConnectionError>) {
        self.state.lock().connect_failures.extend(errors);
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state.lock().ack_mode = mode;
    }

    /// Drop the link as if the network failed
    pub fn drop_connection(&self, reason: &str) {
        let sink = {
            let mut state = self.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.subscriptions.clear();
            state.sink.take()
        };
        warn!("[PAPER] Dropping connection: {}", reason);
        if let Some(sink) = sink {
            sink.connection_lost(reason);
        }
    }

    /// Seed a holding (as if carried over from a previous session)
    pub fn set_position(&self, instrument: InstrumentKey, quantity: Decimal, average_cost: Decimal) {
        let position = Position::restored(instrument.clone(), quantity, average_cost, Utc::now());
        self.state.lock().positions.insert(instrument, position);
    }

    pub fn set_price(&self, instrument: InstrumentKey, price: Decimal) {
        self.state.lock().prices.insert(instrument, price);
    }

    /// Deliver a tick if the instrument is subscribed; returns whether it was delivered
    pub fn publish_tick(&self, tick: TickMessage) -> bool {
        let sink = {
            let mut state = self.state.lock();
            if tick.field == TickField::Last {
                state.prices.insert(tick.instrument.clone(), tick.value);
            }
            let subscribed = state
                .subscriptions
                .contains(&Topic::MarketData(tick.instrument.clone()));
            if !(state.connected && subscribed) {
                return false;
            }
            state.sink.clone()
        };

        match sink.map(|s| s.tick(tick)) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("[PAPER] Tick not delivered: {}", e);
                false
            }
            None => false,
        }
    }

    /// Execute `quantity` of a working order at `price`
    ///
    /// Events are only pushed while connected; executions that happen during
    /// a disconnect are visible through `executions()` and `order_reports()`.
    pub async fn fill(
        &self,
        broker_order_id: BrokerOrderId,
        quantity: Decimal,
        price: Decimal,
    ) -> Option<Fill> {
        let (fill, outbox) = {
            let mut state = self.state.lock();
            let fill = state.execute(broker_order_id, quantity, price, Utc::now())?;
            let outbox = state.outbox_for_fill(&fill, broker_order_id);
            (fill, outbox)
        };
        outbox.flush().await;
        Some(fill)
    }

    /// Push an already-reported execution again
    pub async fn redeliver_execution(&self, order_id: OrderId, sequence: u64) -> bool {
        let (fill, sink) = {
            let state = self.state.lock();
            let fill = state
                .executions
                .iter()
                .find(|f| f.order_id == order_id && f.sequence == sequence)
                .cloned();
            (fill, state.sink.clone())
        };

        match (fill, sink) {
            (Some(fill), Some(sink)) => {
                debug!("[PAPER] Re-delivering execution {}#{}", order_id, sequence);
                sink.order_event(OrderEvent::Execution(fill)).await.is_ok()
            }
            _ => false,
        }
    }

    /// Forget the execution log while keeping order reports
    ///
    /// Brokers only answer execution queries for the current session; this
    /// puts the book in that state.
    pub fn expire_executions(&self) -> usize {
        let mut state = self.state.lock();
        let expired = state.executions.len();
        state.executions.clear();
        debug!("[PAPER] Expired {} execution(s)", expired);
        expired
    }

    // Inspection

    pub fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    pub fn active_subscriptions(&self) -> Vec<Topic> {
        self.state.lock().subscriptions.iter().cloned().collect()
    }

    /// Requests the broker accepted, oldest first
    pub fn received_orders(&self) -> Vec<OrderRequest> {
        self.state
            .lock()
            .orders
            .values()
            .map(|o| o.request.clone())
            .collect()
    }

    pub fn order_report(&self, broker_order_id: BrokerOrderId) -> Option<OrderStatusReport> {
        self.state
            .lock()
            .orders
            .get(&broker_order_id)
            .map(|o| o.report.clone())
    }

    pub fn broker_id_for(&self, order_id: OrderId) -> Option<BrokerOrderId> {
        self.state
            .lock()
            .orders
            .iter()
            .find(|(_, o)| o.request.order_id == order_id)
            .map(|(id, _)| *id)
    }

    pub fn position(&self, instrument: &InstrumentKey) -> Decimal {
        self.state
            .lock()
            .positions
            .get(instrument)
            .map(|p| p.quantity)
            .unwrap_or_default()
    }

    pub fn cash(&self) -> Decimal {
        self.state.lock().cash
    }
}

impl State {
    fn execute(
        &mut self,
        broker_order_id: BrokerOrderId,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Option<Fill> {
        let order = self.orders.get_mut(&broker_order_id)?;
        if order.report.status != BrokerOrderStatus::Working {
            warn!(
                "[PAPER] Ignoring fill for order {} in state {:?}",
                broker_order_id, order.report.status
            );
            return None;
        }

        let quantity = quantity.min(order.report.quantity - order.report.filled_quantity);
        if quantity <= Decimal::ZERO {
            return None;
        }

        let report = &mut order.report;
        let prior = report.avg_fill_price.unwrap_or_default() * report.filled_quantity;
        report.filled_quantity += quantity;
        report.avg_fill_price = Some((prior + quantity * price) / report.filled_quantity);
        report.timestamp = at;
        if report.filled_quantity >= report.quantity {
            report.status = BrokerOrderStatus::Filled;
        }
        order.executions += 1;

        let fill = Fill {
            order_id: order.request.order_id,
            broker_order_id: Some(broker_order_id),
            sequence: order.executions,
            instrument: order.request.instrument.clone(),
            side: order.request.side,
            quantity,
            price,
            timestamp: at,
        };

        self.positions
            .entry(fill.instrument.clone())
            .or_insert_with(|| Position::flat(fill.instrument.clone()))
            .apply_fill(fill.side, quantity, price, at);
        self.cash -= fill.side.signed(quantity) * price;
        self.prices.entry(fill.instrument.clone()).or_insert(price);
        self.executions.push(fill.clone());

        info!(
            "[PAPER] Filled {} {} {} @ {} (order {}, exec #{})",
            fill.side, quantity, fill.instrument, price, broker_order_id, fill.sequence
        );
        Some(fill)
    }

    fn outbox_for_fill(&self, fill: &Fill, broker_order_id: BrokerOrderId) -> Outbox {
        if !self.connected {
            return Outbox::default();
        }
        let mut outbox = Outbox {
            sink: self.sink.clone(),
            ..Default::default()
        };
        outbox.orders.push(OrderEvent::Execution(fill.clone()));
        if let Some(order) = self.orders.get(&broker_order_id) {
            outbox.orders.push(OrderEvent::Status(order.report.clone()));
        }
        if let Some(report) = self.position_report(&fill.instrument) {
            outbox.account.push(AccountEvent::Position(report));
        }
        outbox
            .account
            .push(AccountEvent::Summary(self.summary(Utc::now())));
        outbox
    }

    fn position_report(&self, instrument: &InstrumentKey) -> Option<PositionReport> {
        self.positions.get(instrument).map(|p| PositionReport {
            account: self.account.clone(),
            instrument: instrument.clone(),
            quantity: p.quantity,
            average_cost: p.average_cost,
            timestamp: p.updated_at.unwrap_or_else(Utc::now),
        })
    }

    fn summary(&self, at: DateTime<Utc>) -> AccountSummary {
        let mut market_value = Decimal::ZERO;
        let mut gross = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut unrealized = Decimal::ZERO;

        for (instrument, position) in &self.positions {
            let mut marked = position.clone();
            if let Some(price) = self.prices.get(instrument) {
                marked.mark(*price);
            }
            market_value += marked.quantity * marked.mark_price.unwrap_or(marked.average_cost);
            gross += marked.notional();
            realized += marked.realized_pnl;
            unrealized += marked.unrealized_pnl;
        }

        AccountSummary::new(self.account.clone(), at)
            .with_value(AccountTag::NetLiquidation, self.cash + market_value)
            .with_value(AccountTag::TotalCashValue, self.cash)
            .with_value(AccountTag::CashBalance, self.cash)
            .with_value(AccountTag::RealizedPnL, realized)
            .with_value(AccountTag::UnrealizedPnL, unrealized)
            .with_value(AccountTag::MaintMarginReq, gross * MARGIN_RATE)
    }

    fn is_marketable(&self, request: &OrderRequest) -> Option<Decimal> {
        let last = *self.prices.get(&request.instrument)?;
        match (request.order_type, request.limit_price) {
            (OrderType::Market, _) => Some(last),
            (OrderType::Limit, Some(limit)) => match request.side {
                Side::Buy if limit >= last => Some(last),
                Side::Sell if limit <= last => Some(last),
                _ => None,
            },
            _ => None,
        }
    }
}

#[async_trait]
impl BrokerSession for PaperBroker {
    async fn connect(
        &self,
        params: &ConnectionParams,
        sink: BrokerEventSink,
    ) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.connected = true;
        state.sink = Some(sink);
        state.account = params.account.clone();
        state.subscriptions.clear();
        state.connects += 1;
        info!(
            "[PAPER] Session {} open for account {}",
            state.connects, params.account
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.sink = None;
        state.subscriptions.clear();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(ConnectionError::NotConnected);
        }
        state.subscriptions.insert(topic.clone());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), ConnectionError> {
        self.state.lock().subscriptions.remove(topic);
        Ok(())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, ConnectionError> {
        let (broker_order_id, ack_mode, fill_price) = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(ConnectionError::NotConnected);
            }

            let ack_mode = state.ack_mode.clone();
            match &ack_mode {
                AckMode::Reject(reason) => {
                    return Ok(OrderAck::Rejected {
                        order_id: request.order_id,
                        reason: reason.clone(),
                    });
                }
                AckMode::Drop => (0, ack_mode, None),
                AckMode::Accept | AckMode::Withhold => {
                    let broker_order_id = state.next_broker_id;
                    state.next_broker_id += 1;

                    let fill_price = if state.auto_fill {
                        state.is_marketable(&request)
                    } else {
                        None
                    };

                    let report = OrderStatusReport {
                        order_id: Some(request.order_id),
                        broker_order_id,
                        instrument: request.instrument.clone(),
                        side: request.side,
                        quantity: request.quantity,
                        filled_quantity: Decimal::ZERO,
                        avg_fill_price: None,
                        status: BrokerOrderStatus::Working,
                        reason: None,
                        timestamp: Utc::now(),
                    };
                    state.orders.insert(
                        broker_order_id,
                        PaperOrder {
                            request: request.clone(),
                            report,
                            executions: 0,
                        },
                    );
                    (broker_order_id, ack_mode, fill_price)
                }
            }
        };

        match ack_mode {
            AckMode::Withhold | AckMode::Drop => {
                debug!("[PAPER] Withholding acknowledgment for {}", request.order_id);
                std::future::pending::<()>().await;
                Err(ConnectionError::NotConnected)
            }
            _ => {
                if let Some(price) = fill_price {
                    self.fill(broker_order_id, request.quantity, price).await;
                }
                Ok(OrderAck::Accepted {
                    order_id: request.order_id,
                    broker_order_id,
                })
            }
        }
    }

    async fn cancel_order(&self, request: CancelRequest) -> Result<(), ConnectionError> {
        let outbox = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(ConnectionError::NotConnected);
            }
            let sink = state.sink.clone();
            let order = state
                .orders
                .get_mut(&request.broker_order_id)
                .ok_or_else(|| {
                    ConnectionError::Broker(format!("unknown order {}", request.broker_order_id))
                })?;
            if order.report.status != BrokerOrderStatus::Working {
                return Err(ConnectionError::Broker(format!(
                    "order {} is not working",
                    request.broker_order_id
                )));
            }
            order.report.status = BrokerOrderStatus::Cancelled;
            order.report.reason = Some("cancelled by client".to_string());
            order.report.timestamp = Utc::now();

            Outbox {
                sink,
                orders: vec![OrderEvent::Status(order.report.clone())],
                account: Vec::new(),
            }
        };
        outbox.flush().await;
        Ok(())
    }

    async fn order_reports(&self) -> Result<Vec<OrderStatusReport>, ConnectionError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .map(|o| o.report.clone())
            .collect())
    }

    async fn executions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>, ConnectionError> {
        Ok(self
            .state
            .lock()
            .executions
            .iter()
            .filter(|f| since.is_none_or(|t| f.timestamp > t))
            .cloned()
            .collect())
    }

    async fn positions(&self, _account: &str) -> Result<Vec<PositionReport>, ConnectionError> {
        let state = self.state.lock();
        Ok(state
            .positions
            .keys()
            .filter_map(|instrument| state.position_report(instrument))
            .collect())
    }

    /// No link, no summary: account values are never made up
    async fn account_summary(&self, _account: &str) -> Result<AccountSummary, ConnectionError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(ConnectionError::NotConnected);
        }
        Ok(state.summary(Utc::now()))
    }

    fn name(&self) -> &str {
        "PaperBroker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{BackoffPolicy, ClientIdRegistry, ConnectionManager, QueueCapacities};
    use meridian_core::TimeInForce;
    use std::sync::Arc;

    fn request(side: Side, quantity: Decimal) -> OrderRequest {
        OrderRequest {
            order_id: OrderId::new_v4(),
            account: "DU1".into(),
            instrument: InstrumentKey::stock("AAPL"),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    #[tokio::test]
    async fn test_partial_fills_update_book() {
        let broker = Arc::new(PaperBroker::new(dec!(100000)));
        let (manager, mut streams) = ConnectionManager::new(
            broker.clone(),
            BackoffPolicy::default(),
            QueueCapacities::default(),
            ClientIdRegistry::new(),
        );
        manager.connect(ConnectionParams::local("DU1")).await.unwrap();

        let ack = manager.place_order(request(Side::Buy, dec!(100))).await.unwrap();
        let OrderAck::Accepted { broker_order_id, .. } = ack else {
            panic!("expected accept");
        };

        broker.fill(broker_order_id, dec!(40), dec!(10)).await.unwrap();
        let fill = broker.fill(broker_order_id, dec!(60), dec!(11)).await.unwrap();
        assert_eq!(fill.sequence, 2);

        let report = broker.order_report(broker_order_id).unwrap();
        assert_eq!(report.status, BrokerOrderStatus::Filled);
        assert_eq!(report.avg_fill_price, Some(dec!(10.6)));
        assert_eq!(broker.position(&InstrumentKey::stock("AAPL")), dec!(100));
        assert_eq!(broker.cash(), dec!(98940));

        // execution, status per fill
        let mut executions = 0;
        while let Some(event) = streams.orders.try_recv().unwrap() {
            if matches!(event, OrderEvent::Execution(_)) {
                executions += 1;
            }
        }
        assert_eq!(executions, 2);

        // No further fills once complete
        assert!(broker.fill(broker_order_id, dec!(1), dec!(11)).await.is_none());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_auto_fill_market_order() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)).with_auto_fill(true));
        broker.set_price(InstrumentKey::stock("AAPL"), dec!(50));
        let (manager, _streams) = ConnectionManager::new(
            broker.clone(),
            BackoffPolicy::default(),
            QueueCapacities::default(),
            ClientIdRegistry::new(),
        );
        manager.connect(ConnectionParams::local("DU1")).await.unwrap();

        manager.place_order(request(Side::Sell, dec!(10))).await.unwrap();
        assert_eq!(broker.position(&InstrumentKey::stock("AAPL")), dec!(-10));

        let summary = manager.account_summary().await.unwrap();
        assert_eq!(summary.get(AccountTag::TotalCashValue), Some(dec!(10500)));
        assert_eq!(summary.get(AccountTag::NetLiquidation), Some(dec!(10000)));
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_no_account_summary_while_disconnected() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)));
        let (manager, _streams) = ConnectionManager::new(
            broker.clone(),
            BackoffPolicy::default(),
            QueueCapacities::default(),
            ClientIdRegistry::new(),
        );
        assert!(matches!(
            broker.account_summary("DU1").await,
            Err(ConnectionError::NotConnected)
        ));

        manager.connect(ConnectionParams::local("DU1")).await.unwrap();
        assert!(manager.account_summary().await.is_ok());

        manager.disconnect().await;
        assert!(matches!(
            manager.account_summary().await,
            Err(ConnectionError::NotConnected)
        ));
        assert!(matches!(
            broker.account_summary("DU1").await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reject_mode() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)));
        broker.set_ack_mode(AckMode::Reject("insufficient margin".into()));
        let (manager, _streams) = ConnectionManager::new(
            broker.clone(),
            BackoffPolicy::default(),
            QueueCapacities::default(),
            ClientIdRegistry::new(),
        );
        manager.connect(ConnectionParams::local("DU1")).await.unwrap();

        let ack = manager.place_order(request(Side::Buy, dec!(1))).await.unwrap();
        assert!(matches!(ack, OrderAck::Rejected { reason, .. } if reason == "insufficient margin"));
        assert!(broker.received_orders().is_empty());
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn test_cancel_only_working_orders() {
        let broker = Arc::new(PaperBroker::new(dec!(10000)));
        let (manager, _streams) = ConnectionManager::new(
            broker.clone(),
            BackoffPolicy::default(),
            QueueCapacities::default(),
            ClientIdRegistry::new(),
        );
        manager.connect(ConnectionParams::local("DU1")).await.unwrap();

        let req = request(Side::Buy, dec!(5));
        let order_id = req.order_id;
        manager.place_order(req).await.unwrap();
        let broker_order_id = broker.broker_id_for(order_id).unwrap();

        let cancel = CancelRequest {
            order_id,
            broker_order_id,
        };
        manager.cancel_order(cancel.clone()).await.unwrap();
        assert_eq!(
            broker.order_report(broker_order_id).unwrap().status,
            BrokerOrderStatus::Cancelled
        );
        assert!(matches!(
            manager.cancel_order(cancel).await,
            Err(ConnectionError::Broker(_))
        ));
        manager.disconnect().await;
    }
}
