//! Price Band Strategy
//!
//! Demonstration strategy for paper trading:
//! - Buys when the mark falls below the rolling mean by more than the band
//! - Sells when it rises above the band
//! - Targets flat once price is back near the mean

use chrono::Utc;
use meridian_core::{InstrumentKey, MarketSnapshot, Position, Side, TradeIntent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::StrategyError;
use crate::history::PriceHistory;
use crate::strategy::Strategy;

/// Configuration for the price band strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceBandConfig {
    pub name: String,
    pub instrument: InstrumentKey,
    /// Prices in the rolling mean
    pub window: usize,
    /// Entry distance from the mean, in basis points
    pub band_bps: Decimal,
    /// Exit distance from the mean, in basis points
    pub exit_bps: Decimal,
    pub trade_size: Decimal,
    /// Strategy stops adding beyond this absolute position
    pub max_position: Decimal,
}

impl Default for PriceBandConfig {
    fn default() -> Self {
        Self {
            name: "price-band".to_string(),
            instrument: InstrumentKey::stock("AAPL"),
            window: 20,
            band_bps: dec!(50), // 0.5% away from the mean
            exit_bps: dec!(10),
            trade_size: dec!(100),
            max_position: dec!(500),
        }
    }
}

pub struct PriceBand {
    config: PriceBandConfig,
}

impl PriceBand {
    pub fn new(config: PriceBandConfig) -> Self {
        Self { config }
    }

    /// Distance of `price` from `mean` in basis points
    fn deviation_bps(price: Decimal, mean: Decimal) -> Decimal {
        (price - mean) / mean * dec!(10000)
    }
}

impl Strategy for PriceBand {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn instruments(&self) -> Vec<InstrumentKey> {
        vec![self.config.instrument.clone()]
    }

    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        position: &Position,
        history: &PriceHistory,
    ) -> Result<Option<TradeIntent>, StrategyError> {
        let Some(price) = snapshot.mark_price() else {
            return Ok(None);
        };
        let Some(mean) = history.mean(self.config.window) else {
            return Ok(None);
        };
        if mean <= Decimal::ZERO {
            return Err(StrategyError::evaluation(
                &self.config.name,
                format!("non-positive mean price {}", mean),
            ));
        }

        let deviation = Self::deviation_bps(price, mean);
        let held = position.quantity;
        let now = snapshot.timestamp.unwrap_or_else(Utc::now);
        let instrument = snapshot.instrument.clone();

        if deviation < -self.config.band_bps && held < self.config.max_position {
            let qty = self.config.trade_size.min(self.config.max_position - held);
            log::info!(
                "[STRAT] {} BUY signal: deviation={:.2}bps, price={}, mean={}",
                self.config.name,
                deviation,
                price,
                mean
            );
            return Ok(Some(
                TradeIntent::delta(instrument, Side::Buy, qty, &self.config.name, now)
                    .with_confidence((deviation.abs() / (self.config.band_bps * dec!(4))).min(Decimal::ONE)),
            ));
        }

        if deviation > self.config.band_bps && held > -self.config.max_position {
            let qty = self.config.trade_size.min(self.config.max_position + held);
            log::info!(
                "[STRAT] {} SELL signal: deviation={:.2}bps, price={}, mean={}",
                self.config.name,
                deviation,
                price,
                mean
            );
            return Ok(Some(
                TradeIntent::delta(instrument, Side::Sell, qty, &self.config.name, now)
                    .with_confidence((deviation.abs() / (self.config.band_bps * dec!(4))).min(Decimal::ONE)),
            ));
        }

        if !held.is_zero() && deviation.abs() <= self.config.exit_bps {
            log::info!(
                "[STRAT] {} EXIT: price {} back within {}bps of mean {}",
                self.config.name,
                price,
                self.config.exit_bps,
                mean
            );
            // Closing beats new entries from other strategies
            return Ok(Some(
                TradeIntent::target(instrument, Decimal::ZERO, &self.config.name, now).with_priority(10),
            ));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{IntentQuantity, TickField};

    fn config() -> PriceBandConfig {
        PriceBandConfig {
            window: 4,
            band_bps: dec!(100),
            exit_bps: dec!(20),
            trade_size: dec!(100),
            max_position: dec!(150),
            ..Default::default()
        }
    }

    fn snapshot(version: u64, last: Decimal) -> MarketSnapshot {
        let mut snap = MarketSnapshot::empty(InstrumentKey::stock("AAPL"));
        snap.set_field(TickField::Last, last);
        snap.timestamp = Some(Utc::now());
        snap.version = version;
        snap
    }

    fn history(prices: &[Decimal]) -> PriceHistory {
        let mut history = PriceHistory::new(InstrumentKey::stock("AAPL"), 10);
        for (i, p) in prices.iter().enumerate() {
            history.record(&snapshot(i as u64 + 1, *p));
        }
        history
    }

    fn position(qty: Decimal) -> Position {
        let mut pos = Position::flat(InstrumentKey::stock("AAPL"));
        pos.quantity = qty;
        pos
    }

    #[test]
    fn test_no_signal_without_enough_history() {
        let strategy = PriceBand::new(config());
        let hist = history(&[dec!(100), dec!(100)]);
        let result = strategy
            .evaluate(&snapshot(3, dec!(90)), &position(dec!(0)), &hist)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_buy_below_band_capped_by_max_position() {
        let strategy = PriceBand::new(config());
        // mean of 100, 100, 100, 96 = 99; 96 is ~303bps below
        let hist = history(&[dec!(100), dec!(100), dec!(100), dec!(96)]);

        let intent = strategy
            .evaluate(&snapshot(4, dec!(96)), &position(dec!(100)), &hist)
            .unwrap()
            .unwrap();
        assert_eq!(intent.direction, Side::Buy);
        assert_eq!(intent.quantity, IntentQuantity::Delta(dec!(50)));
        assert_eq!(intent.strategy_id, "price-band");
    }

    #[test]
    fn test_sell_above_band() {
        let strategy = PriceBand::new(config());
        let hist = history(&[dec!(100), dec!(100), dec!(100), dec!(104)]);

        let intent = strategy
            .evaluate(&snapshot(4, dec!(104)), &position(dec!(0)), &hist)
            .unwrap()
            .unwrap();
        assert_eq!(intent.direction, Side::Sell);
        assert_eq!(intent.quantity, IntentQuantity::Delta(dec!(100)));
    }

    #[test]
    fn test_exit_near_mean() {
        let strategy = PriceBand::new(config());
        let hist = history(&[dec!(100), dec!(100), dec!(100), dec!(100)]);

        let intent = strategy
            .evaluate(&snapshot(4, dec!(100)), &position(dec!(-100)), &hist)
            .unwrap()
            .unwrap();
        assert_eq!(intent.quantity, IntentQuantity::Target(Decimal::ZERO));
        assert_eq!(intent.priority, 10);
        assert_eq!(intent.resolve(dec!(-100)), (Side::Buy, dec!(100)));
    }
}
