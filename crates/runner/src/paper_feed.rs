//! Paper Feed - synthetic prices for paper trading
//!
//! Random-walks a last price per instrument and quotes a bid/ask around it.
//! Ticks go through the paper broker, so they reach the engine the same way
//! live market data would: only for subscribed instruments, only while the
//! link is up.

use chrono::Utc;
use log::{debug, info};
use meridian_core::{InstrumentKey, TickField};
use meridian_gateway::{PaperBroker, TickMessage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::PaperConfig;

const DEFAULT_PRICE: Decimal = dec!(100);
const MIN_PRICE: Decimal = dec!(0.01);
const BPS: Decimal = dec!(10000);

/// Quote sizes published with every bid/ask
const QUOTE_SIZE: Decimal = dec!(100);

pub struct PaperFeed {
    prices: BTreeMap<InstrumentKey, Decimal>,
    volatility_bps: Decimal,
    spread_bps: Decimal,
    rng: StdRng,
}

impl PaperFeed {
    pub fn new(instruments: &[InstrumentKey], config: &PaperConfig) -> Self {
        let prices = instruments
            .iter()
            .map(|instrument| {
                let start = config
                    .initial_prices
                    .get(instrument.symbol())
                    .copied()
                    .unwrap_or(DEFAULT_PRICE);
                (instrument.clone(), start)
            })
            .collect();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            prices,
            volatility_bps: config.volatility_bps,
            spread_bps: config.spread_bps,
            rng,
        }
    }

    pub fn price(&self, instrument: &InstrumentKey) -> Option<Decimal> {
        self.prices.get(instrument).copied()
    }

    /// Move every price one step and return the resulting ticks
    pub fn next_ticks(&mut self) -> Vec<TickMessage> {
        let now = Utc::now();
        let mut ticks = Vec::with_capacity(self.prices.len() * 5);

        for (instrument, price) in self.prices.iter_mut() {
            // Uniform move in [-volatility, +volatility] bps
            let step = Decimal::from(self.rng.gen_range(-10_000i64..=10_000)) / BPS;
            let change = *price * self.volatility_bps * step / BPS;
            *price = (*price + change).round_dp(2).max(MIN_PRICE);

            let half_spread = (*price * self.spread_bps / BPS / dec!(2)).round_dp(2).max(MIN_PRICE);
            let bid = (*price - half_spread).max(MIN_PRICE);
            let ask = *price + half_spread;

            for (field, value) in [
                (TickField::Bid, bid),
                (TickField::BidSize, QUOTE_SIZE),
                (TickField::Ask, ask),
                (TickField::AskSize, QUOTE_SIZE),
                (TickField::Last, *price),
            ] {
                ticks.push(TickMessage::new(instrument.clone(), field, value, now));
            }
        }
        ticks
    }

    /// Publish one step through the broker; returns ticks delivered
    pub fn tick(&mut self, broker: &PaperBroker) -> usize {
        self.next_ticks()
            .into_iter()
            .filter(|tick| broker.publish_tick(tick.clone()))
            .count()
    }

    /// Publish every `interval` until `stop` turns true
    pub async fn run(mut self, broker: Arc<PaperBroker>, interval: Duration, mut stop: watch::Receiver<bool>) {
        info!("[PAPER] Price feed started ({:?} interval, {} instrument(s))", interval, self.prices.len());
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let delivered = self.tick(&broker);
                    debug!("[PAPER] Published {} tick(s)", delivered);
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("[PAPER] Price feed stopped");
    }
}
