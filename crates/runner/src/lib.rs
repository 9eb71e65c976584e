//! Meridian Runner - Engine Coordinator
//!
//! Owns the trading engine's lifecycle and its single event loop:
//!
//! - **Config**: one JSON document covering every component
//! - **Coordinator**: builds the components, connects, reconciles, routes
//!   broker events and strategy intents, and shuts down per policy
//! - **Paper Feed**: synthetic prices published through the paper broker
//!
//! ## Architecture
//!
//! ```text
//!        Broker (PaperBroker / SDK adapter)
//!                  │
//!          ┌───────▼────────┐  Lost / Restored / Fatal
//!          │ ConnectionMgr  │────────────────────────┐
//!          └─┬─────┬─────┬──┘                        │
//!     ticks  │     │     │ account                   │
//!            │  orders   │                           ▼
//! ┌──────────▼─────▼─────▼───────────────────────────────────────┐
//! │                    EngineCoordinator loop                    │
//! │                                                              │
//! │  MarketDataHub ──snapshot──► StrategyEngine ──intents──┐     │
//! │        │ marks                                         ▼     │
//! │        ▼                                        RiskManager  │
//! │     Ledger ◄──────fills──── OrderManager ◄──approved───┘     │
//! └──────────────────────────────────────────────────────────────┘
//!                  │ EngineEvent
//!                  ▼
//!              operator
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod paper_feed;

pub use config::{
    load_config, load_config_from_str, load_default_config, BackoffConfig, ConfigError,
    EngineConfig, MarketDataConfig, OrdersConfig, PaperConfig, StrategyConfig,
};
pub use coordinator::{EngineCoordinator, EngineEvent, EngineOptions, EngineStats};
pub use error::{EngineError, Result};
pub use paper_feed::PaperFeed;
