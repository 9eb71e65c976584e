//! Bounded per-instrument price window

use chrono::{DateTime, Utc};
use meridian_core::{InstrumentKey, MarketSnapshot};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// One observation in the window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Most recent mark prices for one instrument, oldest first
#[derive(Debug, Clone)]
pub struct PriceHistory {
    instrument: InstrumentKey,
    points: VecDeque<PricePoint>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(instrument: InstrumentKey, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            instrument,
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a snapshot's mark price
    ///
    /// Snapshots without a price, or not newer than the last one recorded,
    /// are ignored. Returns whether a point was added.
    pub fn record(&mut self, snapshot: &MarketSnapshot) -> bool {
        let (Some(price), Some(timestamp)) = (snapshot.mark_price(), snapshot.timestamp) else {
            return false;
        };
        if self
            .points
            .back()
            .is_some_and(|last| snapshot.version <= last.version)
        {
            return false;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(PricePoint {
            price,
            timestamp,
            version: snapshot.version,
        });
        true
    }

    pub fn instrument(&self) -> &InstrumentKey {
        &self.instrument
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<Decimal> {
        self.points.back().map(|p| p.price)
    }

    pub fn points(&self) -> impl Iterator<Item = &PricePoint> {
        self.points.iter()
    }

    /// The last `n` prices, oldest first; fewer if the window is shorter
    pub fn last_prices(&self, n: usize) -> Vec<Decimal> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).map(|p| p.price).collect()
    }

    /// Mean of the last `n` prices; `None` until `n` are available
    pub fn mean(&self, n: usize) -> Option<Decimal> {
        if n == 0 || self.points.len() < n {
            return None;
        }
        let sum: Decimal = self.last_prices(n).into_iter().sum();
        Some(sum / Decimal::from(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::TickField;
    use rust_decimal_macros::dec;

    fn snapshot(version: u64, last: Decimal) -> MarketSnapshot {
        let mut snap = MarketSnapshot::empty(InstrumentKey::stock("AAPL"));
        snap.set_field(TickField::Last, last);
        snap.timestamp = Some(Utc::now());
        snap.version = version;
        snap
    }

    #[test]
    fn test_window_is_bounded() {
        let mut history = PriceHistory::new(InstrumentKey::stock("AAPL"), 3);
        for (v, p) in [(1, dec!(10)), (2, dec!(11)), (3, dec!(12)), (4, dec!(13))] {
            assert!(history.record(&snapshot(v, p)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.last_prices(10), vec![dec!(11), dec!(12), dec!(13)]);
        assert_eq!(history.mean(3), Some(dec!(12)));
        assert_eq!(history.mean(4), None);
    }

    #[test]
    fn test_same_version_recorded_once() {
        let mut history = PriceHistory::new(InstrumentKey::stock("AAPL"), 10);
        assert!(history.record(&snapshot(5, dec!(10))));
        assert!(!history.record(&snapshot(5, dec!(10))));
        assert!(!history.record(&snapshot(4, dec!(9))));
        assert!(!history.record(&MarketSnapshot::empty(InstrumentKey::stock("AAPL"))));
        assert_eq!(history.latest(), Some(dec!(10)));
    }
}
