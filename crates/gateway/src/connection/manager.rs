//! Connection Manager
//!
//! Owns the single logical link to the broker:
//! - validates parameters and claims the client id
//! - keeps a registry of subscriptions and re-issues it after every reconnect
//! - supervises the link and reconnects with exponential backoff when it drops
//! - announces `Lost` / `Restored` / `Fatal` so the engine can pause order flow
//!
//! Authentication and parameter errors are never retried.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use meridian_core::Fill;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::params::{ClientIdRegistry, ConnectionParams};
use super::session::{BrokerEventSink, BrokerSession, SessionSignal};
use crate::error::ConnectionError;
use crate::messages::{
    AccountEvent, AccountSummary, CancelRequest, OrderAck, OrderEvent, OrderRequest,
    OrderStatusReport, PositionReport, TickMessage,
};
use crate::transport::{EventQueue, OverflowPolicy, QueueReceiver, Topic};

/// Identifies one successful (re)connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub client_id: i32,
    /// Increments on every successful connect or reconnect
    pub session: u64,
    pub connected_at: DateTime<Utc>,
}

/// Link state changes announced to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Link dropped; a reconnect loop is running
    Lost { reason: String },
    /// Link is back and all subscriptions were re-issued
    Restored {
        handle: ConnectionHandle,
        attempts: u32,
    },
    /// Reconnecting stopped; operator action needed
    Fatal { reason: String },
}

/// Queue sizes per source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapacities {
    pub market: usize,
    pub orders: usize,
    pub account: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            market: 4096,
            orders: 1024,
            account: 256,
        }
    }
}

/// Consumer ends of the broker event queues, one per source stream
pub struct BrokerStreams {
    pub market: QueueReceiver<TickMessage>,
    pub orders: QueueReceiver<OrderEvent>,
    pub account: QueueReceiver<AccountEvent>,
}

type SignalReceiver = mpsc::UnboundedReceiver<SessionSignal>;

pub struct ConnectionManager {
    session: Arc<dyn BrokerSession>,
    backoff: BackoffPolicy,
    client_ids: Arc<ClientIdRegistry>,
    sink: BrokerEventSink,
    subscriptions: Mutex<BTreeSet<Topic>>,
    params: Mutex<Option<ConnectionParams>>,
    handle: Mutex<Option<ConnectionHandle>>,
    connected: AtomicBool,
    sessions: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
    signals: Mutex<Option<SignalReceiver>>,
    supervisor: Mutex<Option<JoinHandle<SignalReceiver>>>,
    /// Serializes connect / disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        session: Arc<dyn BrokerSession>,
        backoff: BackoffPolicy,
        capacities: QueueCapacities,
        client_ids: Arc<ClientIdRegistry>,
    ) -> (Arc<Self>, BrokerStreams) {
        let (market_tx, market_rx) =
            EventQueue::bounded(capacities.market, OverflowPolicy::DropOldest);
        let (orders_tx, orders_rx) =
            EventQueue::bounded(capacities.orders, OverflowPolicy::Backpressure);
        let (account_tx, account_rx) =
            EventQueue::bounded(capacities.account, OverflowPolicy::Backpressure);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let (shutdown, _) = watch::channel(false);

        let manager = Arc::new(Self {
            session,
            backoff,
            client_ids,
            sink: BrokerEventSink::new(market_tx, orders_tx, account_tx, signal_tx),
            subscriptions: Mutex::new(BTreeSet::new()),
            params: Mutex::new(None),
            handle: Mutex::new(None),
            connected: AtomicBool::new(false),
            sessions: AtomicU64::new(0),
            events,
            shutdown,
            signals: Mutex::new(Some(signal_rx)),
            supervisor: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        });

        let streams = BrokerStreams {
            market: market_rx,
            orders: orders_rx,
            account: account_rx,
        };

        (manager, streams)
    }

    /// Open the link and start supervising it
    ///
    /// The first connection attempt is not retried; reconnect-with-backoff
    /// only applies to links that were up and then dropped.
    pub async fn connect(
        self: &Arc<Self>,
        params: ConnectionParams,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let _guard = self.lifecycle.lock().await;

        if self.is_connected() {
            let current = self.params.lock().clone();
            return match (current, self.handle()) {
                (Some(current), Some(handle)) if current == params => Ok(handle),
                _ => Err(ConnectionError::InvalidParams(
                    "already connected with different parameters".into(),
                )),
            };
        }

        params.validate()?;
        self.client_ids.claim(&params)?;

        info!(
            "[CONN] Connecting to {} as client {} via {}",
            params.address(),
            params.client_id,
            self.session.name()
        );

        if let Err(e) = self.session.connect(&params, self.sink.clone()).await {
            self.client_ids.release(&params);
            error!("[CONN] Connect to {} failed: {}", params.address(), e);
            return Err(e);
        }

        *self.params.lock() = Some(params.clone());
        let handle = self.mark_connected(&params);

        if let Err(e) = self.resubscribe_all().await {
            warn!("[CONN] Could not issue registered subscriptions: {}", e);
        }

        self.spawn_supervisor();
        info!(
            "[CONN] Connected (client {}, session {})",
            handle.client_id, handle.session
        );
        Ok(handle)
    }

    /// Close the link and stop reconnecting
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        self.shutdown.send_replace(true);
        let supervisor = self.supervisor.lock().take();
        if let Some(task) = supervisor {
            match task.await {
                Ok(signals) => *self.signals.lock() = Some(signals),
                Err(e) => error!("[CONN] Supervisor task failed: {}", e),
            }
        }

        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.session.disconnect().await;
        *self.handle.lock() = None;

        if let Some(params) = self.params.lock().take() {
            self.client_ids.release(&params);
            info!(
                "[CONN] Disconnected from {} (was connected: {})",
                params.address(),
                was_connected
            );
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle.lock().clone()
    }

    /// Account code of the current connection
    pub fn account(&self) -> Option<String> {
        self.params.lock().as_ref().map(|p| p.account.clone())
    }

    /// Link state notifications
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Register a topic. Registering the same topic twice is a no-op.
    ///
    /// Topics registered while disconnected are issued on the next connect.
    pub async fn subscribe(&self, topic: Topic) -> Result<(), ConnectionError> {
        if !self.subscriptions.lock().insert(topic.clone()) {
            debug!("[CONN] Already subscribed to {}", topic);
            return Ok(());
        }

        if !self.is_connected() {
            debug!("[CONN] Deferring subscription to {} until connected", topic);
            return Ok(());
        }

        info!("[CONN] Subscribing to {}", topic);
        self.session
            .subscribe(&topic)
            .await
            .inspect_err(|e| warn!("[CONN] Subscribe to {} failed: {}", topic, e))
    }

    pub async fn unsubscribe(&self, topic: &Topic) -> Result<(), ConnectionError> {
        if !self.subscriptions.lock().remove(topic) {
            return Ok(());
        }
        if self.is_connected() {
            info!("[CONN] Unsubscribing from {}", topic);
            self.session.unsubscribe(topic).await?;
        }
        Ok(())
    }

    /// Registered topics
    pub fn subscriptions(&self) -> Vec<Topic> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Ticks evicted from the market data queue so far
    pub fn dropped_ticks(&self) -> u64 {
        self.sink.dropped_ticks()
    }

    // Broker requests; all require a live link

    pub async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, ConnectionError> {
        self.ensure_connected()?;
        self.session.place_order(request).await
    }

    pub async fn cancel_order(&self, request: CancelRequest) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        self.session.cancel_order(request).await
    }

    pub async fn order_reports(&self) -> Result<Vec<OrderStatusReport>, ConnectionError> {
        self.ensure_connected()?;
        self.session.order_reports().await
    }

    pub async fn executions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>, ConnectionError> {
        self.ensure_connected()?;
        self.session.executions(since).await
    }

    pub async fn positions(&self) -> Result<Vec<PositionReport>, ConnectionError> {
        self.ensure_connected()?;
        let account = self.account().ok_or(ConnectionError::NotConnected)?;
        self.session.positions(&account).await
    }

    pub async fn account_summary(&self) -> Result<AccountSummary, ConnectionError> {
        self.ensure_connected()?;
        let account = self.account().ok_or(ConnectionError::NotConnected)?;
        self.session.account_summary(&account).await
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    fn mark_connected(&self, params: &ConnectionParams) -> ConnectionHandle {
        let handle = ConnectionHandle {
            client_id: params.client_id,
            session: self.sessions.fetch_add(1, Ordering::SeqCst) + 1,
            connected_at: Utc::now(),
        };
        *self.handle.lock() = Some(handle.clone());
        self.connected.store(true, Ordering::SeqCst);
        handle
    }

    async fn resubscribe_all(&self) -> Result<(), ConnectionError> {
        let topics = self.subscriptions();
        for topic in &topics {
            self.session.subscribe(topic).await?;
        }
        if !topics.is_empty() {
            info!("[CONN] Issued {} subscription(s)", topics.len());
        }
        Ok(())
    }

    fn spawn_supervisor(self: &Arc<Self>) {
        let Some(mut signals) = self.signals.lock().take() else {
            warn!("[CONN] No session signal receiver; link will not be supervised");
            return;
        };
        // Notices from a previous link are irrelevant now
        while signals.try_recv().is_ok() {}

        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.supervise(signals, shutdown).await });
        *self.supervisor.lock() = Some(task);
    }

    async fn supervise(
        self: Arc<Self>,
        mut signals: SignalReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> SignalReceiver {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                signal = signals.recv() => match signal {
                    Some(SessionSignal::Disconnected { reason }) => {
                        if !self.connected.swap(false, Ordering::SeqCst) {
                            continue;
                        }
                        *self.handle.lock() = None;
                        warn!("[CONN] Connection lost: {}", reason);
                        let _ = self.events.send(ConnectionEvent::Lost { reason });

                        if !self.reconnect(&mut signals, &mut shutdown).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("[CONN] Supervisor stopped");
        signals
    }

    /// Returns false when reconnecting stopped for good (fatal or shutdown)
    async fn reconnect(
        &self,
        signals: &mut SignalReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let Some(params) = self.params.lock().clone() else {
            return false;
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.backoff.allows(attempt) {
                let reason = format!("gave up reconnecting after {} attempt(s)", attempt - 1);
                error!("[CONN] {}", reason);
                let _ = self.events.send(ConnectionEvent::Fatal { reason });
                return false;
            }

            let delay = self.backoff.delay(attempt);
            info!("[CONN] Reconnect attempt {} in {:?}", attempt, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return false,
            }

            match self.session.connect(&params, self.sink.clone()).await {
                Ok(()) => {
                    while signals.try_recv().is_ok() {}
                    let handle = self.mark_connected(&params);

                    if let Err(e) = self.resubscribe_all().await {
                        warn!("[CONN] Re-subscribe after reconnect failed: {}", e);
                        self.connected.store(false, Ordering::SeqCst);
                        if e.is_fatal() {
                            let _ = self.events.send(ConnectionEvent::Fatal {
                                reason: e.to_string(),
                            });
                            return false;
                        }
                        self.session.disconnect().await;
                        continue;
                    }

                    info!(
                        "[CONN] Connection restored after {} attempt(s) (session {})",
                        attempt, handle.session
                    );
                    let _ = self.events.send(ConnectionEvent::Restored {
                        handle,
                        attempts: attempt,
                    });
                    return true;
                }
                Err(e) if e.is_fatal() => {
                    error!("[CONN] Reconnect failed fatally: {}", e);
                    let _ = self.events.send(ConnectionEvent::Fatal {
                        reason: e.to_string(),
                    });
                    return false;
                }
                Err(e) => warn!("[CONN] Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}
