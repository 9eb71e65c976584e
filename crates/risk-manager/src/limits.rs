//! Risk Limits
//!
//! Process-wide configuration read by the risk manager. Changes are staged
//! and only take effect between evaluation cycles.

use chrono::Duration;
use meridian_core::InstrumentKey;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, RiskError};

/// What to do when an intent would breach a size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreachAction {
    /// Shrink the intent to the limit boundary
    #[default]
    Rescale,
    /// Refuse the intent
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Absolute position cap for instruments without an override
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,
    /// Per-symbol position caps
    #[serde(default)]
    pub position_overrides: BTreeMap<String, Decimal>,
    /// Cap on gross notional across all instruments
    #[serde(default = "default_max_exposure")]
    pub max_aggregate_exposure: Decimal,
    /// Loss (positive number) after which risk-increasing intents stop
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
    /// Orders one strategy may send per window
    #[serde(default = "default_max_orders")]
    pub max_orders_per_window: u32,
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
    #[serde(default)]
    pub on_breach: BreachAction,
}

fn default_max_position() -> Decimal {
    dec!(1000)
}

fn default_max_exposure() -> Decimal {
    dec!(1000000)
}

fn default_max_daily_loss() -> Decimal {
    dec!(5000)
}

fn default_max_orders() -> u32 {
    10
}

fn default_rate_window_ms() -> u64 {
    60_000
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position: default_max_position(),
            position_overrides: BTreeMap::new(),
            max_aggregate_exposure: default_max_exposure(),
            max_daily_loss: default_max_daily_loss(),
            max_orders_per_window: default_max_orders(),
            rate_window_ms: default_rate_window_ms(),
            on_breach: BreachAction::default(),
        }
    }
}

impl RiskLimits {
    pub fn with_max_position(mut self, max: Decimal) -> Self {
        self.max_position = max;
        self
    }

    pub fn with_position_override(mut self, symbol: impl Into<String>, max: Decimal) -> Self {
        self.position_overrides.insert(symbol.into().to_uppercase(), max);
        self
    }

    pub fn with_max_aggregate_exposure(mut self, max: Decimal) -> Self {
        self.max_aggregate_exposure = max;
        self
    }

    pub fn with_max_daily_loss(mut self, max: Decimal) -> Self {
        self.max_daily_loss = max;
        self
    }

    pub fn with_order_rate(mut self, max_orders: u32, window_ms: u64) -> Self {
        self.max_orders_per_window = max_orders;
        self.rate_window_ms = window_ms;
        self
    }

    pub fn with_breach_action(mut self, action: BreachAction) -> Self {
        self.on_breach = action;
        self
    }

    /// Position cap for an instrument (override by symbol, else the default)
    pub fn position_limit(&self, instrument: &InstrumentKey) -> Decimal {
        self.position_overrides
            .get(instrument.symbol())
            .copied()
            .unwrap_or(self.max_position)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::milliseconds(self.rate_window_ms as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_position < Decimal::ZERO {
            return Err(RiskError::InvalidLimits("max_position is negative".into()));
        }
        if let Some((symbol, _)) = self
            .position_overrides
            .iter()
            .find(|(_, max)| max.is_sign_negative() && !max.is_zero())
        {
            return Err(RiskError::InvalidLimits(format!(
                "position override for {} is negative",
                symbol
            )));
        }
        if self.max_aggregate_exposure < Decimal::ZERO {
            return Err(RiskError::InvalidLimits(
                "max_aggregate_exposure is negative".into(),
            ));
        }
        if self.max_daily_loss < Decimal::ZERO {
            return Err(RiskError::InvalidLimits(
                "max_daily_loss must be given as a positive amount".into(),
            ));
        }
        if self.max_orders_per_window == 0 || self.rate_window_ms == 0 {
            return Err(RiskError::InvalidLimits(
                "order rate limit needs a non-zero count and window".into(),
            ));
        }
        Ok(())
    }
}
