//! Meridian Strategy Engine
//!
//! Runs pluggable strategies against market snapshots and queues the trade
//! intents they emit. Strategies never place orders: every intent goes
//! through risk evaluation first.
//!
//! ## Architecture
//!
//! ```text
//! MarketDataHub ──► snapshot ──┐
//!                              ▼
//! Ledger ───────► position ──► StrategyEngine ──► PriceHistory (per instrument)
//!                              │
//!                              │ spawn_blocking, one task per strategy
//!                              ▼
//!                     ┌────────────────┐
//!                     │ Strategy  ...  │  (registration order)
//!                     └───────┬────────┘
//!                             │ TradeIntent
//!                             ▼
//!                        IntentQueue ──► Risk Manager
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_strategy::{PriceBand, PriceBandConfig, StrategyEngine};
//!
//! let engine = StrategyEngine::new(Default::default());
//! engine.register(Arc::new(PriceBand::new(PriceBandConfig::default())))?;
//! engine.evaluate(&snapshot, &position).await;
//! while let Some(intent) = engine.next_intent() { /* risk check */ }
//! ```

pub mod engine;
pub mod error;
pub mod history;
pub mod price_band;
pub mod queue;
pub mod strategy;

// Re-export main types
pub use engine::{CycleReport, EvaluationCadence, StrategyEngine, StrategyEngineConfig};
pub use error::{Result, StrategyError};
pub use history::{PriceHistory, PricePoint};
pub use price_band::{PriceBand, PriceBandConfig};
pub use queue::IntentQueue;
pub use strategy::Strategy;
