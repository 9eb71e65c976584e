//! Order Manager
//!
//! Owns every order the engine creates:
//! - Turns approved intents into orders and submits them under an
//!   acknowledgment deadline
//! - Applies broker acknowledgments, executions and status reports through
//!   the state machine, one order at a time
//! - Forwards each execution to the ledger exactly once
//! - Reconciles local orders against the broker after a reconnect

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use meridian_core::{
    BrokerOrderId, Fill, InstrumentKey, Order, OrderId, OrderStatus, OrderType, Side, TradeIntent,
};
use meridian_gateway::{CancelRequest, ConnectionError, OrderAck, OrderEvent, OrderRequest, OrderStatusReport};
use meridian_ledger::Ledger;
use meridian_ports::Clock;
use meridian_risk_manager::RiskDecision;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};

use crate::error::{OrderError, OrderStateConflict, ReconciliationMismatch, Result};
use crate::gateway::OrderGateway;
use crate::lifecycle::{self, Transition};

/// Paper or live trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    pub account: String,
    pub mode: TradingMode,
    /// Operator explicitly allowed live orders
    pub live_confirmed: bool,
    /// How long a submission waits for the broker's answer
    pub ack_timeout: Duration,
    /// How long an order may be missing from the broker before it is
    /// considered lost
    pub reconcile_grace: ChronoDuration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            mode: TradingMode::Paper,
            live_confirmed: false,
            ack_timeout: Duration::from_secs(5),
            reconcile_grace: ChronoDuration::seconds(10),
        }
    }
}

/// Notices for the operator
#[derive(Debug, Clone, PartialEq)]
pub enum OrderNotice {
    /// An order's broker state is unknown; the caller should reconcile
    ReconcileRequested { order_id: OrderId },
    StateConflict(OrderStateConflict),
    NeedsAttention(ReconciliationMismatch),
}

/// What an inbound order event did
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Updated(OrderStatus),
    Unchanged,
    Duplicate,
    Conflict(OrderStateConflict),
    /// The ledger would not book the execution; the order is left untouched
    /// or flagged for attention
    Refused(String),
    /// No local order matches
    Unknown,
}

impl From<Transition> for EventOutcome {
    fn from(t: Transition) -> Self {
        match t {
            Transition::Changed(status) => EventOutcome::Updated(status),
            Transition::Unchanged => EventOutcome::Unchanged,
            Transition::Duplicate => EventOutcome::Duplicate,
            Transition::Conflict(c) => EventOutcome::Conflict(c),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Executions the ledger had not seen
    pub executions_applied: usize,
    /// Orders whose status changed
    pub updated: usize,
    /// Orders marked rejected as lost on reconnect
    pub lost: Vec<OrderId>,
    pub mismatches: Vec<ReconciliationMismatch>,
    /// Open orders still missing at the broker, inside the grace period
    pub awaiting: usize,
}

/// What to do with open orders and positions on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicy {
    /// Leave working orders and positions at the broker
    #[default]
    LeaveOpen,
    /// Cancel working orders, keep positions
    CancelOpen,
    /// Cancel working orders and close every position at market
    Flatten,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub left_open: Vec<OrderId>,
    pub cancelled: Vec<OrderId>,
    pub flatten_orders: Vec<OrderId>,
    pub failures: Vec<String>,
}

type OrderSlot = Arc<Mutex<Order>>;

/// Decrements the in-flight count when a submission finishes, however it ends
struct InFlight<'a> {
    count: &'a AtomicUsize,
    idle: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, idle: &'a Notify) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count, idle }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct OrderManager {
    config: OrderManagerConfig,
    gateway: Arc<dyn OrderGateway>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    orders: DashMap<OrderId, OrderSlot>,
    by_broker_id: DashMap<BrokerOrderId, OrderId>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    reconcile_requested: AtomicBool,
    /// When reconciliation first found an open order missing at the broker
    missing_since: DashMap<OrderId, DateTime<Utc>>,
    notices: broadcast::Sender<OrderNotice>,
}

impl OrderManager {
    pub fn new(
        config: OrderManagerConfig,
        gateway: Arc<dyn OrderGateway>,
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            config,
            gateway,
            ledger,
            clock,
            orders: DashMap::new(),
            by_broker_id: DashMap::new(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            reconcile_requested: AtomicBool::new(false),
            missing_since: DashMap::new(),
            notices,
        }
    }

    pub fn notices(&self) -> broadcast::Receiver<OrderNotice> {
        self.notices.subscribe()
    }

    pub fn mode(&self) -> TradingMode {
        self.config.mode
    }

    fn notify(&self, notice: OrderNotice) {
        // No subscriber is fine
        let _ = self.notices.send(notice);
    }

    // Submission

    /// Build and submit the order a risk decision approved
    pub async fn submit_intent(&self, intent: &TradeIntent, decision: &RiskDecision) -> Result<Order> {
        let (side, quantity) = decision.order_quantity().ok_or(OrderError::NothingToSubmit)?;
        let order_type = if intent.limit_price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let mut order = Order::new(
            intent.instrument.clone(),
            side,
            order_type,
            quantity,
            intent.strategy_id.clone(),
            self.clock.now(),
        );
        if let Some(price) = intent.limit_price {
            order = order.with_limit_price(price);
        }
        self.submit(order).await
    }

    /// Submit a locally created order and wait for the broker's answer
    ///
    /// On timeout the order stays `Pending`, is flagged indeterminate, and a
    /// reconciliation is requested. The request is never resent.
    pub async fn submit(&self, order: Order) -> Result<Order> {
        if !self.is_accepting() {
            return Err(OrderError::NotAccepting);
        }
        self.place(order).await
    }

    async fn place(&self, order: Order) -> Result<Order> {
        if self.config.mode == TradingMode::Live && !self.config.live_confirmed {
            error!("[OMS] Live order refused: live trading not confirmed");
            return Err(OrderError::LiveTradingNotConfirmed);
        }
        if order.status != OrderStatus::Pending || !order.validate() {
            return Err(OrderError::InvalidOrder(format!(
                "{} {} {} ({:?}, {})",
                order.side, order.quantity, order.instrument, order.order_type, order.status
            )));
        }

        let _in_flight = InFlight::enter(&self.in_flight, &self.idle);
        let order_id = order.id;
        let request = OrderRequest::from_order(&order, self.config.account.clone());
        let slot = Arc::new(Mutex::new(order));
        self.orders.insert(order_id, slot.clone());

        info!(
            "[OMS] Submitting {} {} {} ({:?}) as {}",
            request.side, request.quantity, request.instrument, request.order_type, order_id
        );

        let answer = tokio::time::timeout(self.config.ack_timeout, self.gateway.place_order(request)).await;
        let now = self.clock.now();
        let mut order = slot.lock().await;

        match answer {
            Ok(Ok(OrderAck::Accepted { broker_order_id, .. })) => {
                self.by_broker_id.insert(broker_order_id, order_id);
                match lifecycle::acknowledge(&mut order, broker_order_id, now) {
                    Transition::Conflict(c) => self.conflict(c),
                    Transition::Changed(_) => {
                        info!("[OMS] {} acknowledged as broker order {}", order_id, broker_order_id)
                    }
                    _ => debug!("[OMS] {} acknowledged after its first execution", order_id),
                }
                Ok(order.clone())
            }
            Ok(Ok(OrderAck::Rejected { reason, .. })) => {
                warn!("[OMS] {} rejected by broker: {}", order_id, reason);
                if let Transition::Conflict(c) = lifecycle::reject(&mut order, reason.clone(), now) {
                    self.conflict(c);
                }
                Err(OrderError::Rejected { order_id, reason })
            }
            Ok(Err(ConnectionError::NotConnected)) => {
                // Never left the process
                warn!("[OMS] {} not sent: not connected", order_id);
                lifecycle::reject(&mut order, "not connected", now);
                Err(OrderError::Connection(ConnectionError::NotConnected))
            }
            Ok(Err(e)) => {
                self.mark_indeterminate(&mut order, &e.to_string());
                Err(OrderError::Connection(e))
            }
            Err(_) => {
                self.mark_indeterminate(
                    &mut order,
                    &format!("no acknowledgment within {:?}", self.config.ack_timeout),
                );
                Err(OrderError::AckTimeout {
                    order_id,
                    timeout: self.config.ack_timeout,
                })
            }
        }
    }

    fn mark_indeterminate(&self, order: &mut Order, why: &str) {
        if order.status != OrderStatus::Pending {
            // An execution or status report got there first
            return;
        }
        warn!("[OMS] {} indeterminate ({}), requesting reconciliation", order.id, why);
        order.indeterminate = true;
        self.reconcile_requested.store(true, Ordering::SeqCst);
        self.notify(OrderNotice::ReconcileRequested { order_id: order.id });
    }

    /// Whether a reconciliation was requested since the last call
    pub fn take_reconcile_request(&self) -> bool {
        self.reconcile_requested.swap(false, Ordering::SeqCst)
    }

    // Cancellation

    /// Ask the broker to cancel; the order becomes `Cancelled` when the
    /// broker confirms
    pub async fn cancel(&self, order_id: OrderId) -> Result<()> {
        let slot = self.slot(order_id).ok_or(OrderError::UnknownOrder(order_id))?;
        let mut order = slot.lock().await;

        if !order.status.accepts_cancel() {
            if order.status.is_terminal() {
                warn!(
                    "[OMS] {}",
                    OrderStateConflict {
                        order_id,
                        status: order.status,
                        event: "cancel request".into(),
                    }
                );
            }
            return Err(OrderError::CancelNotAllowed {
                order_id,
                status: order.status,
            });
        }
        if order.cancel_requested {
            debug!("[OMS] Cancel already requested for {}", order_id);
            return Ok(());
        }
        let Some(broker_order_id) = order.broker_order_id else {
            return Err(OrderError::CancelNotAllowed {
                order_id,
                status: order.status,
            });
        };

        info!("[OMS] Cancelling {} (broker {})", order_id, broker_order_id);
        self.gateway
            .cancel_order(CancelRequest {
                order_id,
                broker_order_id,
            })
            .await?;
        order.cancel_requested = true;
        Ok(())
    }

    // Inbound broker events

    pub async fn on_order_event(&self, event: OrderEvent) -> EventOutcome {
        match event {
            OrderEvent::Execution(fill) => self.on_execution(&fill).await,
            OrderEvent::Status(report) => self.on_status_report(&report).await,
        }
    }

    /// Apply an execution to its order and to the ledger
    ///
    /// The ledger books first. An execution it refuses never counts toward
    /// the order's filled quantity, so the two cannot drift apart.
    pub async fn on_execution(&self, fill: &Fill) -> EventOutcome {
        let slot = self.slot(fill.order_id).or_else(|| {
            fill.broker_order_id
                .and_then(|id| self.by_broker_id.get(&id).map(|e| *e.value()))
                .and_then(|id| self.slot(id))
        });

        if let Err(e) = self.ledger.apply_fill(fill) {
            error!("[OMS] Ledger refused execution #{} of {}: {}", fill.sequence, fill.order_id, e);
            if let Some(slot) = slot {
                let mut order = slot.lock().await;
                self.refuse_execution(&mut order, fill, &e.to_string());
            }
            return EventOutcome::Refused(e.to_string());
        }

        let Some(slot) = slot else {
            warn!(
                "[OMS] Execution #{} for unknown order {} ({} {} {})",
                fill.sequence, fill.order_id, fill.side, fill.quantity, fill.instrument
            );
            return EventOutcome::Unknown;
        };

        let mut order = slot.lock().await;
        let transition = lifecycle::apply_execution(&mut order, fill);
        if let Some(broker_order_id) = order.broker_order_id {
            self.by_broker_id.insert(broker_order_id, order.id);
        }
        match &transition {
            Transition::Changed(status) => info!(
                "[OMS] {} {} {} @ {} -> {} ({}/{})",
                order.id, fill.side, fill.quantity, fill.price, status, order.filled_quantity, order.quantity
            ),
            Transition::Duplicate => {
                debug!("[OMS] Duplicate execution #{} for {}", fill.sequence, order.id)
            }
            Transition::Conflict(c) => self.conflict(c.clone()),
            Transition::Unchanged => {}
        }
        transition.into()
    }

    fn refuse_execution(&self, order: &mut Order, fill: &Fill, why: &str) {
        if !order.status.is_open() {
            return;
        }
        let mismatch = ReconciliationMismatch {
            order_id: order.id,
            broker_order_id: order.broker_order_id.or(fill.broker_order_id),
            local_filled: order.filled_quantity,
            broker_filled: order.filled_quantity + fill.quantity,
            detail: format!("execution #{} not booked: {}", fill.sequence, why),
        };
        lifecycle::flag_attention(order, self.clock.now());
        self.notify(OrderNotice::NeedsAttention(mismatch));
    }

    pub async fn on_status_report(&self, report: &OrderStatusReport) -> EventOutcome {
        let order_id = report
            .order_id
            .filter(|id| self.orders.contains_key(id))
            .or_else(|| self.by_broker_id.get(&report.broker_order_id).map(|e| *e.value()));
        let Some(slot) = order_id.and_then(|id| self.slot(id)) else {
            debug!(
                "[OMS] Status {:?} for broker order {} not placed by this engine",
                report.status, report.broker_order_id
            );
            return EventOutcome::Unknown;
        };

        let mut order = slot.lock().await;
        let transition = lifecycle::apply_status_report(&mut order, report);
        self.by_broker_id.insert(report.broker_order_id, order.id);
        match &transition {
            Transition::Changed(status) => info!("[OMS] {} -> {}", order.id, status),
            Transition::Conflict(c) => self.conflict(c.clone()),
            _ => {}
        }
        transition.into()
    }

    fn conflict(&self, conflict: OrderStateConflict) {
        warn!("[OMS] {}", conflict);
        self.notify(OrderNotice::StateConflict(conflict));
    }

    // Reconciliation

    /// Bring local orders in line with the broker's records
    ///
    /// Executions are replayed first (the ledger drops any it already has),
    /// then each open order is matched to a broker report by broker id, or
    /// by local id for orders never acknowledged.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let reports = self.gateway.order_reports().await?;
        let executions = self.gateway.executions(None).await?;
        let now = self.clock.now();
        let mut result = ReconcileReport::default();

        info!(
            "[OMS] Reconciling {} local order(s) against {} broker report(s), {} execution(s)",
            self.orders.len(),
            reports.len(),
            executions.len()
        );

        for fill in &executions {
            let seen = self.ledger.has_applied(fill.order_id, fill.sequence);
            if let EventOutcome::Updated(_) = self.on_execution(fill).await {
                result.updated += 1;
            }
            if !seen {
                result.executions_applied += 1;
            }
        }

        for slot in self.slots() {
            let mut order = slot.lock().await;
            if !order.status.is_open() {
                continue;
            }

            let report = reports.iter().find(|r| {
                Some(r.broker_order_id) == order.broker_order_id || r.order_id == Some(order.id)
            });

            let Some(report) = report else {
                let first_missed = *self.missing_since.entry(order.id).or_insert(now);
                if now - first_missed >= self.config.reconcile_grace {
                    warn!("[OMS] {} has no broker record, marking lost", order.id);
                    lifecycle::reject(&mut order, "lost on reconnect", now);
                    self.missing_since.remove(&order.id);
                    result.lost.push(order.id);
                } else {
                    result.awaiting += 1;
                }
                continue;
            };

            self.missing_since.remove(&order.id);
            self.by_broker_id.insert(report.broker_order_id, order.id);
            if let Transition::Changed(_) = lifecycle::apply_status_report(&mut order, report) {
                result.updated += 1;
            }

            if order.status.is_open() && order.filled_quantity != report.filled_quantity {
                let mismatch = ReconciliationMismatch {
                    order_id: order.id,
                    broker_order_id: Some(report.broker_order_id),
                    local_filled: order.filled_quantity,
                    broker_filled: report.filled_quantity,
                    detail: format!("broker reports {:?}", report.status),
                };
                error!("[OMS] {}", OrderError::Reconciliation(mismatch.clone()));
                lifecycle::flag_attention(&mut order, now);
                self.notify(OrderNotice::NeedsAttention(mismatch.clone()));
                result.mismatches.push(mismatch);
            }
        }

        if result.awaiting > 0 {
            // Run again so the grace period can expire
            self.reconcile_requested.store(true, Ordering::SeqCst);
        }

        info!(
            "[OMS] Reconciliation done: {} execution(s) applied, {} updated, {} lost, {} mismatch(es), {} awaiting",
            result.executions_applied,
            result.updated,
            result.lost.len(),
            result.mismatches.len(),
            result.awaiting
        );
        Ok(result)
    }

    // Queries

    fn slot(&self, order_id: OrderId) -> Option<OrderSlot> {
        self.orders.get(&order_id).map(|e| e.value().clone())
    }

    fn slots(&self) -> Vec<OrderSlot> {
        self.orders.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_order(&self, order_id: OrderId) -> Option<Order> {
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;
        Some(order.clone())
    }

    pub async fn orders(&self) -> Vec<Order> {
        let mut all = Vec::with_capacity(self.orders.len());
        for slot in self.slots() {
            all.push(slot.lock().await.clone());
        }
        all.sort_by_key(|o| o.created_at);
        all
    }

    pub async fn open_orders(&self) -> Vec<Order> {
        self.orders()
            .await
            .into_iter()
            .filter(|o| o.status.is_open())
            .collect()
    }

    /// Signed quantity still working for an instrument
    pub async fn pending_quantity(&self, instrument: &InstrumentKey) -> Decimal {
        let mut total = Decimal::ZERO;
        for slot in self.slots() {
            let order = slot.lock().await;
            if &order.instrument == instrument {
                total += order.open_signed_quantity();
            }
        }
        total
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // Shutdown

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("[OMS] No longer accepting orders");
        }
    }

    pub fn resume_accepting(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no submission is awaiting its acknowledgment
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    /// Stop accepting, drain in-flight submissions, then apply `policy`
    pub async fn shutdown(&self, policy: ShutdownPolicy, drain_limit: Duration) -> ShutdownReport {
        self.stop_accepting();
        if !self.wait_idle(drain_limit).await {
            warn!(
                "[OMS] {} submission(s) still unanswered after {:?}",
                self.in_flight(),
                drain_limit
            );
        }

        let mut report = ShutdownReport::default();
        let open = self.open_orders().await;

        match policy {
            ShutdownPolicy::LeaveOpen => {
                for order in &open {
                    info!(
                        "[OMS] Leaving {} open: {} {} {} ({}, filled {})",
                        order.id, order.side, order.quantity, order.instrument, order.status, order.filled_quantity
                    );
                    report.left_open.push(order.id);
                }
                info!("[OMS] Shutdown decision: leave open ({} order(s))", open.len());
            }
            ShutdownPolicy::CancelOpen | ShutdownPolicy::Flatten => {
                self.cancel_all(&open, &mut report).await;
                if policy == ShutdownPolicy::Flatten {
                    self.flatten(&mut report).await;
                }
                info!(
                    "[OMS] Shutdown decision: {:?} ({} cancelled, {} flatten order(s), {} failure(s))",
                    policy,
                    report.cancelled.len(),
                    report.flatten_orders.len(),
                    report.failures.len()
                );
            }
        }
        report
    }

    async fn cancel_all(&self, open: &[Order], report: &mut ShutdownReport) {
        for order in open {
            match self.cancel(order.id).await {
                Ok(()) => report.cancelled.push(order.id),
                Err(e) => {
                    warn!("[OMS] Could not cancel {}: {}", order.id, e);
                    report.failures.push(format!("cancel {}: {}", order.id, e));
                }
            }
        }
    }

    async fn flatten(&self, report: &mut ShutdownReport) {
        for position in self.ledger.positions().into_iter().filter(|p| !p.is_flat()) {
            let side = Side::from_delta(-position.quantity);
            let order = Order::new(
                position.instrument.clone(),
                side,
                OrderType::Market,
                position.quantity.abs(),
                "shutdown",
                self.clock.now(),
            );
            info!(
                "[OMS] Flattening {} {} {}",
                side,
                position.quantity.abs(),
                position.instrument
            );
            match self.place(order).await {
                Ok(order) => report.flatten_orders.push(order.id),
                Err(e) => {
                    error!("[OMS] Flatten of {} failed: {}", position.instrument, e);
                    report.failures.push(format!("flatten {}: {}", position.instrument, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use meridian_clock::ManualClock;
    use meridian_core::Side;
    use rust_decimal_macros::dec;
    use stub::Recorder;

    /// Gateway that records requests and answers from a script
    mod stub {
        use super::*;
        use async_trait::async_trait;
        use std::sync::Mutex as StdMutex;

        #[derive(Default)]
        pub struct Recorder {
            pub placed: StdMutex<Vec<OrderRequest>>,
            pub cancelled: StdMutex<Vec<CancelRequest>>,
            pub reject_with: StdMutex<Option<String>>,
            pub hang: AtomicBool,
        }

        #[async_trait]
        impl OrderGateway for Recorder {
            async fn place_order(&self, request: OrderRequest) -> std::result::Result<OrderAck, ConnectionError> {
                let order_id = request.order_id;
                let n = {
                    let mut placed = self.placed.lock().unwrap();
                    placed.push(request);
                    placed.len() as i64
                };
                if self.hang.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                if let Some(reason) = self.reject_with.lock().unwrap().clone() {
                    return Ok(OrderAck::Rejected { order_id, reason });
                }
                Ok(OrderAck::Accepted {
                    order_id,
                    broker_order_id: 100 + n,
                })
            }

            async fn cancel_order(&self, request: CancelRequest) -> std::result::Result<(), ConnectionError> {
                self.cancelled.lock().unwrap().push(request);
                Ok(())
            }

            async fn order_reports(&self) -> std::result::Result<Vec<OrderStatusReport>, ConnectionError> {
                Ok(Vec::new())
            }

            async fn executions(
                &self,
                _since: Option<DateTime<Utc>>,
            ) -> std::result::Result<Vec<Fill>, ConnectionError> {
                Ok(Vec::new())
            }
        }
    }

    fn setup(config: OrderManagerConfig) -> (OrderManager, Arc<Recorder>, Arc<Ledger>, Arc<ManualClock>) {
        let gateway = Arc::new(Recorder::default());
        let clock = ManualClock::starting_now();
        let ledger = Arc::new(Ledger::new("DU1", clock.now()));
        let oms = OrderManager::new(
            OrderManagerConfig {
                account: "DU1".into(),
                ..config
            },
            gateway.clone(),
            ledger.clone(),
            clock.clone(),
        );
        (oms, gateway, ledger, clock)
    }

    fn market(qty: Decimal) -> Order {
        Order::new(
            InstrumentKey::stock("AAPL"),
            Side::Buy,
            OrderType::Market,
            qty,
            "test",
            Utc::now(),
        )
    }

    fn fill_for(order: &Order, sequence: u64, qty: Decimal) -> Fill {
        Fill {
            order_id: order.id,
            broker_order_id: order.broker_order_id,
            sequence,
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: qty,
            price: dec!(10),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_submit_acknowledged() {
        let (oms, gateway, _, _) = setup(OrderManagerConfig::default());
        let order = oms.submit(market(dec!(100))).await.unwrap();

        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(order.broker_order_id, Some(101));
        assert_eq!(gateway.placed.lock().unwrap()[0].account, "DU1");
        assert_eq!(oms.pending_quantity(&InstrumentKey::stock("AAPL")).await, dec!(100));
    }

    #[tokio::test]
    async fn test_broker_reject() {
        let (oms, gateway, _, _) = setup(OrderManagerConfig::default());
        *gateway.reject_with.lock().unwrap() = Some("margin".into());

        let order = market(dec!(100));
        let id = order.id;
        assert!(matches!(oms.submit(order).await, Err(OrderError::Rejected { .. })));

        let stored = oms.get_order(id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Rejected);
        assert_eq!(stored.reject_reason.as_deref(), Some("margin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_is_indeterminate_without_retry() {
        let (oms, gateway, _, _) = setup(OrderManagerConfig {
            ack_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        gateway.hang.store(true, Ordering::SeqCst);
        let mut notices = oms.notices();

        let order = market(dec!(100));
        let id = order.id;
        assert!(matches!(oms.submit(order).await, Err(OrderError::AckTimeout { .. })));

        let stored = oms.get_order(id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert!(stored.indeterminate);
        assert_eq!(gateway.placed.lock().unwrap().len(), 1);
        assert!(oms.take_reconcile_request());
        assert!(!oms.take_reconcile_request());
        assert_eq!(
            notices.recv().await.unwrap(),
            OrderNotice::ReconcileRequested { order_id: id }
        );
        assert_eq!(oms.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_live_mode_requires_confirmation() {
        let (oms, gateway, _, _) = setup(OrderManagerConfig {
            mode: TradingMode::Live,
            ..Default::default()
        });
        assert_eq!(
            oms.submit(market(dec!(1))).await.unwrap_err(),
            OrderError::LiveTradingNotConfirmed
        );
        assert!(gateway.placed.lock().unwrap().is_empty());

        let (confirmed, _, _, _) = setup(OrderManagerConfig {
            mode: TradingMode::Live,
            live_confirmed: true,
            ..Default::default()
        });
        assert!(confirmed.submit(market(dec!(1))).await.is_ok());
    }

    #[tokio::test]
    async fn test_fills_reach_ledger_once() {
        let (oms, _, ledger, _) = setup(OrderManagerConfig::default());
        let order = oms.submit(market(dec!(100))).await.unwrap();

        let first = fill_for(&order, 1, dec!(50));
        let second = fill_for(&order, 2, dec!(50));
        assert_eq!(
            oms.on_execution(&first).await,
            EventOutcome::Updated(OrderStatus::PartiallyFilled)
        );
        assert_eq!(oms.on_execution(&second).await, EventOutcome::Updated(OrderStatus::Filled));
        assert_eq!(oms.on_execution(&first).await, EventOutcome::Duplicate);

        let stored = oms.get_order(order.id).await.unwrap();
        assert_eq!(stored.filled_quantity, dec!(100));
        assert_eq!(ledger.get_position(&order.instrument).quantity, dec!(100));
        assert_eq!(oms.pending_quantity(&order.instrument).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let (oms, gateway, _, _) = setup(OrderManagerConfig::default());
        let order = oms.submit(market(dec!(10))).await.unwrap();

        oms.cancel(order.id).await.unwrap();
        // Second request is not resent
        oms.cancel(order.id).await.unwrap();
        assert_eq!(gateway.cancelled.lock().unwrap().len(), 1);

        // Fill wins the race: cancel confirmation afterwards is ignored
        oms.on_execution(&fill_for(&order, 1, dec!(10))).await;
        let report = OrderStatusReport {
            order_id: Some(order.id),
            broker_order_id: 101,
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: dec!(10),
            filled_quantity: dec!(10),
            avg_fill_price: Some(dec!(10)),
            status: meridian_gateway::BrokerOrderStatus::Cancelled,
            reason: None,
            timestamp: Utc::now(),
        };
        assert!(matches!(oms.on_status_report(&report).await, EventOutcome::Conflict(_)));
        assert!(matches!(
            oms.cancel(order.id).await,
            Err(OrderError::CancelNotAllowed { status: OrderStatus::Filled, .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_accepting_refuses_new_orders() {
        let (oms, _, _, _) = setup(OrderManagerConfig::default());
        oms.stop_accepting();
        assert_eq!(oms.submit(market(dec!(1))).await.unwrap_err(), OrderError::NotAccepting);
        assert!(oms.wait_idle(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_reconcile_marks_lost_after_grace() {
        let (oms, _, _, clock) = setup(OrderManagerConfig::default());
        let order = oms.submit(market(dec!(10))).await.unwrap();

        // Broker knows nothing about it yet; inside grace
        let report = oms.reconcile().await.unwrap();
        assert_eq!(report.awaiting, 1);

        clock.advance(ChronoDuration::seconds(30));
        let report = oms.reconcile().await.unwrap();
        assert_eq!(report.lost, vec![order.id]);

        let stored = oms.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Rejected);
        assert_eq!(stored.reject_reason.as_deref(), Some("lost on reconnect"));
    }

    #[tokio::test]
    async fn test_missing_order_keeps_reconcile_requested() {
        let (oms, _, _, clock) = setup(OrderManagerConfig::default());
        let order = oms.submit(market(dec!(10))).await.unwrap();

        let report = oms.reconcile().await.unwrap();
        assert_eq!(report.awaiting, 1);
        assert!(oms.take_reconcile_request());

        // Grace runs from the first miss, not from submission
        clock.advance(ChronoDuration::seconds(5));
        assert_eq!(oms.reconcile().await.unwrap().awaiting, 1);
        assert!(oms.take_reconcile_request());

        clock.advance(ChronoDuration::seconds(5));
        let report = oms.reconcile().await.unwrap();
        assert_eq!(report.lost, vec![order.id]);
        assert!(!oms.take_reconcile_request());
    }

    #[tokio::test]
    async fn test_refused_fill_never_counts_toward_order() {
        let (oms, _, ledger, _) = setup(OrderManagerConfig::default());
        let mut notices = oms.notices();
        let order = oms.submit(market(dec!(10))).await.unwrap();

        let mut bad = fill_for(&order, 1, dec!(10));
        bad.price = Decimal::ZERO;
        assert!(matches!(oms.on_execution(&bad).await, EventOutcome::Refused(_)));

        let stored = oms.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::NeedsAttention);
        assert_eq!(stored.filled_quantity, Decimal::ZERO);
        assert_eq!(ledger.get_position(&order.instrument).quantity, Decimal::ZERO);

        match notices.recv().await.unwrap() {
            OrderNotice::NeedsAttention(mismatch) => {
                assert_eq!(mismatch.order_id, order.id);
                assert_eq!(mismatch.local_filled, Decimal::ZERO);
                assert_eq!(mismatch.broker_filled, dec!(10));
            }
            other => panic!("unexpected notice {:?}", other),
        }
    }
}
