//! Where orders go
//!
//! The order manager only needs the order half of the broker link. The
//! connection manager implements it; tests can substitute their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::Fill;
use meridian_gateway::{
    CancelRequest, ConnectionError, ConnectionManager, OrderAck, OrderRequest, OrderStatusReport,
};

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, ConnectionError>;

    async fn cancel_order(&self, request: CancelRequest) -> Result<(), ConnectionError>;

    async fn order_reports(&self) -> Result<Vec<OrderStatusReport>, ConnectionError>;

    async fn executions(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Fill>, ConnectionError>;
}

#[async_trait]
impl OrderGateway for ConnectionManager {
    async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, ConnectionError> {
        ConnectionManager::place_order(self, request).await
    }

    async fn cancel_order(&self, request: CancelRequest) -> Result<(), ConnectionError> {
        ConnectionManager::cancel_order(self, request).await
    }

    async fn order_reports(&self) -> Result<Vec<OrderStatusReport>, ConnectionError> {
        ConnectionManager::order_reports(self).await
    }

    async fn executions(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Fill>, ConnectionError> {
        ConnectionManager::executions(self, since).await
    }
}
