//! Strategy plugin contract

use meridian_core::{InstrumentKey, MarketSnapshot, Position, TradeIntent};

use crate::error::StrategyError;
use crate::history::PriceHistory;

/// A trading strategy
///
/// Strategies see copies of market and position state and can only answer
/// with an intent; they never touch the ledger or submit orders. Evaluation
/// runs on the blocking worker pool, several strategies at once, so an
/// implementation must be `Send + Sync` and keep any internal state behind
/// its own synchronization.
pub trait Strategy: Send + Sync {
    /// Unique name, also used as the intent's strategy id
    fn name(&self) -> &str;

    /// Instruments this strategy wants to see; empty means all
    fn instruments(&self) -> Vec<InstrumentKey> {
        Vec::new()
    }

    /// Decide whether to trade given the latest snapshot
    fn evaluate(
        &self,
        snapshot: &MarketSnapshot,
        position: &Position,
        history: &PriceHistory,
    ) -> Result<Option<TradeIntent>, StrategyError>;

    /// Whether `instrument` is relevant to this strategy
    fn wants(&self, instrument: &InstrumentKey) -> bool {
        let instruments = self.instruments();
        instruments.is_empty() || instruments.contains(instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Strategy for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn instruments(&self) -> Vec<InstrumentKey> {
            vec![InstrumentKey::stock("AAPL")]
        }

        fn evaluate(
            &self,
            _snapshot: &MarketSnapshot,
            _position: &Position,
            _history: &PriceHistory,
        ) -> Result<Option<TradeIntent>, StrategyError> {
            Ok(None)
        }
    }

    #[test]
    fn test_relevance_filter() {
        let s = Silent;
        assert!(s.wants(&InstrumentKey::stock("AAPL")));
        assert!(!s.wants(&InstrumentKey::stock("MSFT")));

        let boxed: Box<dyn Strategy> = Box::new(Silent);
        assert_eq!(boxed.name(), "silent");
    }
}
