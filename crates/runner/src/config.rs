//! Engine configuration
//!
//! One JSON document with a section per component. Only `connection` is
//! required; every other section falls back to its defaults.

use meridian_core::InstrumentKey;
use meridian_gateway::{BackoffPolicy, ConnectionError, ConnectionParams, QueueCapacities};
use meridian_risk_manager::{RiskError, RiskLimits};
use meridian_strategy::{EvaluationCadence, PriceBandConfig, StrategyEngineConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid connection parameters: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Invalid risk limits: {0}")]
    Risk(#[from] RiskError),
    #[error("No instruments configured")]
    NoInstruments,
    #[error("Strategy {strategy} trades {instrument}, which is not a configured instrument")]
    UnknownInstrument { strategy: String, instrument: String },
    #[error("Duplicate strategy name: {0}")]
    DuplicateStrategy(String),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub connection: ConnectionParams,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentKey>,
    #[serde(default)]
    pub paper: PaperConfig,
}

/// Reconnect schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
    /// Omit to retry forever
    pub max_attempts: Option<u32>,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 60_000,
            max_attempts: None,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Snapshots older than this are degraded and produce no signals
    pub staleness_ms: u64,
    /// Ticks buffered before the oldest are dropped
    pub queue_capacity: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            staleness_ms: 5_000,
            queue_capacity: 4_096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub cadence: EvaluationCadence,
    pub history_window: usize,
    /// Per-cycle deadline for strategy evaluation
    pub evaluation_timeout_ms: u64,
    /// Price band strategies to register at startup
    pub price_band: Vec<PriceBandConfig>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            cadence: EvaluationCadence::OnUpdate,
            history_window: 256,
            evaluation_timeout_ms: 1_000,
            price_band: Vec::new(),
        }
    }
}

impl StrategyConfig {
    pub fn engine_config(&self) -> StrategyEngineConfig {
        StrategyEngineConfig {
            cadence: self.cadence,
            history_window: self.history_window,
            evaluation_timeout: Duration::from_millis(self.evaluation_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    /// How long a submission waits for the broker's acknowledgment
    pub ack_timeout_ms: u64,
    /// How long an order may be missing at the broker before it counts as lost
    pub reconcile_grace_ms: u64,
    /// How long shutdown waits for in-flight submissions and final events
    pub drain_timeout_ms: u64,
    pub queue_capacity: usize,
    pub account_queue_capacity: usize,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            reconcile_grace_ms: 10_000,
            drain_timeout_ms: 5_000,
            queue_capacity: 1_024,
            account_queue_capacity: 256,
        }
    }
}

impl OrdersConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reconcile_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.reconcile_grace_ms as i64)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Paper broker and synthetic price feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_cash: Decimal,
    /// Fill marketable orders as soon as they are accepted
    pub auto_fill: bool,
    pub tick_interval_ms: u64,
    /// Largest move per tick, in basis points
    pub volatility_bps: Decimal,
    /// Quoted spread around the last price, in basis points
    pub spread_bps: Decimal,
    /// Starting price per symbol; unlisted symbols start at 100
    pub initial_prices: BTreeMap<String, Decimal>,
    /// Fixed seed for a reproducible feed
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_cash: dec!(100000),
            auto_fill: true,
            tick_interval_ms: 500,
            volatility_bps: dec!(10),
            spread_bps: dec!(2),
            initial_prices: BTreeMap::new(),
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Minimal configuration for one connection, defaults elsewhere
    pub fn new(connection: ConnectionParams) -> Self {
        Self {
            connection,
            backoff: BackoffConfig::default(),
            market_data: MarketDataConfig::default(),
            risk: RiskLimits::default(),
            strategy: StrategyConfig::default(),
            orders: OrdersConfig::default(),
            instruments: Vec::new(),
            paper: PaperConfig::default(),
        }
    }

    pub fn with_instrument(mut self, instrument: InstrumentKey) -> Self {
        if !self.instruments.contains(&instrument) {
            self.instruments.push(instrument);
        }
        self
    }

    pub fn with_risk(mut self, risk: RiskLimits) -> Self {
        self.risk = risk;
        self
    }

    pub fn queue_capacities(&self) -> QueueCapacities {
        QueueCapacities {
            market: self.market_data.queue_capacity,
            orders: self.orders.queue_capacity,
            account: self.orders.account_queue_capacity,
        }
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.market_data.staleness_ms as i64)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.risk.validate()?;

        if self.instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }
        if self.market_data.staleness_ms == 0 {
            return Err(ConfigError::NotPositive("market_data.staleness_ms"));
        }
        if self.orders.ack_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("orders.ack_timeout_ms"));
        }
        if self.backoff.initial_ms == 0 {
            return Err(ConfigError::NotPositive("backoff.initial_ms"));
        }
        if self.strategy.evaluation_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("strategy.evaluation_timeout_ms"));
        }
        if let EvaluationCadence::Interval { period_ms: 0 } = self.strategy.cadence {
            return Err(ConfigError::NotPositive("strategy.cadence.period_ms"));
        }

        let mut names = Vec::new();
        for band in &self.strategy.price_band {
            if names.contains(&band.name) {
                return Err(ConfigError::DuplicateStrategy(band.name.clone()));
            }
            names.push(band.name.clone());
            if !self.instruments.contains(&band.instrument) {
                return Err(ConfigError::UnknownInstrument {
                    strategy: band.name.clone(),
                    instrument: band.instrument.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Load engine configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the embedded paper-trading configuration
pub fn load_default_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_str(include_str!("engine_config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = load_default_config().unwrap();
        config.validate().unwrap();
        assert_eq!(config.connection.port, 7497);
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.strategy.price_band.len(), 2);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(
            r#"{
                "connection": { "host": "127.0.0.1", "port": 4002, "client_id": 7, "account": "DU1" },
                "instruments": [{ "symbol": "AAPL", "exchange": "SMART", "currency": "USD" }]
            }"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.risk, RiskLimits::default());
        assert_eq!(config.orders.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.market_data.staleness_ms, 5_000);
        assert_eq!(config.backoff.policy().initial, Duration::from_secs(1));
        assert_eq!(config.strategy.cadence, EvaluationCadence::OnUpdate);
        assert_eq!(
            config.strategy.engine_config().evaluation_timeout,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_connection_section_required() {
        let err = load_config_from_str(r#"{ "instruments": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_failures() {
        let base = EngineConfig::new(ConnectionParams::local("DU1"));
        assert!(matches!(base.validate(), Err(ConfigError::NoInstruments)));

        let mut bad_port = base.clone().with_instrument(InstrumentKey::stock("AAPL"));
        bad_port.connection.port = 0;
        assert!(matches!(bad_port.validate(), Err(ConfigError::Connection(_))));

        let mut stray = base.clone().with_instrument(InstrumentKey::stock("AAPL"));
        stray.strategy.price_band.push(PriceBandConfig {
            instrument: InstrumentKey::stock("MSFT"),
            ..Default::default()
        });
        assert!(matches!(
            stray.validate(),
            Err(ConfigError::UnknownInstrument { .. })
        ));

        let mut no_deadline = base.clone().with_instrument(InstrumentKey::stock("AAPL"));
        no_deadline.strategy.evaluation_timeout_ms = 0;
        assert!(matches!(
            no_deadline.validate(),
            Err(ConfigError::NotPositive("strategy.evaluation_timeout_ms"))
        ));

        let mut negative = base.with_instrument(InstrumentKey::stock("AAPL"));
        negative.risk.max_position = dec!(-1);
        assert!(matches!(negative.validate(), Err(ConfigError::Risk(_))));
    }
}
