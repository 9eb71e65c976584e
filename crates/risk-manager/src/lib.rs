//! Meridian Risk Manager
//!
//! Gatekeeper between strategies and the order manager. Every trade intent
//! is approved, rescaled, or rejected against the active [`RiskLimits`]:
//!
//! - **Position Limit**: absolute position per instrument, counting open orders
//! - **Exposure Limit**: gross notional across all instruments
//! - **Daily Loss**: once breached only risk-reducing intents pass
//! - **Order Rate**: orders per strategy per sliding window (retry later)
//!
//! ## Architecture
//!
//! ```text
//!  TradeIntent ─────┐
//!                   ▼
//!  RiskContext ──► RiskManager ──► RiskDecision ──► Order Manager
//!  (ledger,         │   ▲
//!   marks, now)     │   │ begin_cycle()
//!                   │   │
//!                   │  staged RiskLimits ◄── update_limits()
//!                   ▼
//!            OrderRateLimiter
//! ```
//!
//! Limits are swapped only between cycles, so an evaluation never sees a
//! half-applied update.

pub mod decision;
pub mod error;
pub mod limits;
pub mod manager;
pub mod rate;

// Re-export main types
pub use decision::{RejectionClass, RiskCheck, RiskDecision, RiskRejection};
pub use error::{Result, RiskError};
pub use limits::{BreachAction, RiskLimits};
pub use manager::{RiskContext, RiskManager, RiskStats};
pub use rate::OrderRateLimiter;
