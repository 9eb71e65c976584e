use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TickField;
use crate::instruments::InstrumentKey;

/// Latest known market state for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: InstrumentKey,
    pub last: Option<Decimal>,
    pub last_size: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub close: Option<Decimal>,
    /// Timestamp of the last applied tick
    pub timestamp: Option<DateTime<Utc>>,
    /// Number of ticks applied so far
    pub version: u64,
    /// Older than the staleness threshold when this copy was taken
    pub degraded: bool,
}

impl MarketSnapshot {
    /// Snapshot before any tick arrives
    pub fn empty(instrument: InstrumentKey) -> Self {
        Self {
            instrument,
            last: None,
            last_size: None,
            bid: None,
            bid_size: None,
            ask: None,
            ask_size: None,
            volume: None,
            close: None,
            timestamp: None,
            version: 0,
            degraded: false,
        }
    }

    /// Write one field; timestamp and version are the caller's business
    pub fn set_field(&mut self, field: TickField, value: Decimal) {
        let slot = match field {
            TickField::Last => &mut self.last,
            TickField::LastSize => &mut self.last_size,
            TickField::Bid => &mut self.bid,
            TickField::BidSize => &mut self.bid_size,
            TickField::Ask => &mut self.ask,
            TickField::AskSize => &mut self.ask_size,
            TickField::Volume => &mut self.volume,
            TickField::Close => &mut self.close,
        };
        *slot = Some(value);
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Price used for valuation: last trade, then mid, then previous close
    pub fn mark_price(&self) -> Option<Decimal> {
        self.last.or_else(|| self.mid()).or(self.close)
    }

    /// Time since the last tick; `None` before the first one
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.timestamp.map(|ts| now - ts)
    }

    /// Whether this snapshot is older than `threshold` at `now`
    /// (a snapshot that never received a tick counts as stale)
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now).is_none_or(|age| age > threshold)
    }
}
