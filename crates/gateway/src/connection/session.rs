//! Broker session port
//!
//! The engine never talks to a broker SDK directly. An adapter implements
//! [`BrokerSession`] and pushes everything the broker reports into the
//! [`BrokerEventSink`] it was handed at connect time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::Fill;
use tokio::sync::mpsc;

use super::params::ConnectionParams;
use crate::error::{ConnectionError, TransportError};
use crate::messages::{
    AccountEvent, AccountSummary, CancelRequest, OrderAck, OrderEvent, OrderRequest,
    OrderStatusReport, PositionReport, TickMessage,
};
use crate::transport::{QueueSender, Topic};

/// Out-of-band notices from a session to its connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// The link dropped without being asked to
    Disconnected { reason: String },
}

/// Where a session delivers broker callbacks
///
/// Each stream has its own queue so market data bursts never delay order or
/// account events.
#[derive(Clone)]
pub struct BrokerEventSink {
    market: QueueSender<TickMessage>,
    orders: QueueSender<OrderEvent>,
    account: QueueSender<AccountEvent>,
    signals: mpsc::UnboundedSender<SessionSignal>,
}

impl BrokerEventSink {
    pub fn new(
        market: QueueSender<TickMessage>,
        orders: QueueSender<OrderEvent>,
        account: QueueSender<AccountEvent>,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        Self {
            market,
            orders,
            account,
            signals,
        }
    }

    /// Market data never blocks the producer; the oldest tick is evicted instead
    pub fn tick(&self, msg: TickMessage) -> Result<(), TransportError> {
        self.market.try_send(msg)
    }

    pub async fn order_event(&self, event: OrderEvent) -> Result<(), TransportError> {
        self.orders.send(event).await
    }

    pub async fn account_event(&self, event: AccountEvent) -> Result<(), TransportError> {
        self.account.send(event).await
    }

    /// Report an unexpected disconnect
    pub fn connection_lost(&self, reason: impl Into<String>) {
        let _ = self.signals.send(SessionSignal::Disconnected {
            reason: reason.into(),
        });
    }

    /// Ticks evicted from the market data queue so far
    pub fn dropped_ticks(&self) -> u64 {
        self.market.dropped()
    }
}

/// A live link to a brokerage
///
/// Implementations are internally synchronized; every method takes `&self`.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Open the link. Broker callbacks go to `sink` until the next disconnect.
    async fn connect(
        &self,
        params: &ConnectionParams,
        sink: BrokerEventSink,
    ) -> Result<(), ConnectionError>;

    /// Close the link; no more callbacks are delivered afterwards
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn subscribe(&self, topic: &Topic) -> Result<(), ConnectionError>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), ConnectionError>;

    /// Submit an order and wait for the broker's acknowledgment
    async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, ConnectionError>;

    async fn cancel_order(&self, request: CancelRequest) -> Result<(), ConnectionError>;

    /// Open and completed orders for this client
    async fn order_reports(&self) -> Result<Vec<OrderStatusReport>, ConnectionError>;

    /// Executions, optionally only those after `since`
    async fn executions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Fill>, ConnectionError>;

    async fn positions(&self, account: &str) -> Result<Vec<PositionReport>, ConnectionError>;

    async fn account_summary(&self, account: &str) -> Result<AccountSummary, ConnectionError>;

    /// Adapter name for logging
    fn name(&self) -> &str {
        "BrokerSession"
    }
}
