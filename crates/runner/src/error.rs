use meridian_gateway::{ConnectionError, TransportError};
use meridian_ledger::LedgerError;
use meridian_order_manager::OrderError;
use meridian_strategy::StrategyError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Broker event stream closed: {0}")]
    Stream(#[from] TransportError),

    #[error("Engine stopped: {0}")]
    Fatal(String),

    #[error("Engine is already running or has run")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, EngineError>;
