use serde::{Deserialize, Serialize};
use std::fmt;

use crate::values::Symbol;

/// Default routing destination for stock contracts
pub const SMART_ROUTING: &str = "SMART";

/// Default settlement currency
pub const DEFAULT_CURRENCY: &str = "USD";

/// Identity of a tradeable instrument: (symbol, exchange, currency)
///
/// Immutable once built. Used as the key for every market data, position,
/// and order lookup, so it is cheap to clone and hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    symbol: Symbol,
    exchange: String,
    currency: String,
}

impl InstrumentKey {
    pub fn new(
        symbol: impl Into<Symbol>,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            exchange: exchange.into().to_uppercase(),
            currency: currency.into().to_uppercase(),
        }
    }

    /// A stock routed through smart routing and settled in USD
    pub fn stock(symbol: impl Into<Symbol>) -> Self {
        Self::new(symbol, SMART_ROUTING, DEFAULT_CURRENCY)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.symbol, self.exchange, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stock_defaults() {
        let key = InstrumentKey::stock("aapl");
        assert_eq!(key.symbol(), "AAPL");
        assert_eq!(key.exchange(), "SMART");
        assert_eq!(key.currency(), "USD");
        assert_eq!(key.to_string(), "AAPL@SMART/USD");
    }

    #[test]
    fn test_identity_covers_all_parts() {
        let smart = InstrumentKey::stock("SPY");
        let arca = InstrumentKey::new("SPY", "ARCA", "USD");
        let same = InstrumentKey::new("spy", "smart", "usd");

        let mut set = HashSet::new();
        set.insert(smart.clone());
        set.insert(arca);
        set.insert(same);

        assert_eq!(set.len(), 2);
        assert!(set.contains(&smart));
    }

    #[test]
    fn test_serde_shape() {
        let key = InstrumentKey::new("MSFT", "NASDAQ", "USD");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(
            json,
            r#"{"symbol":"MSFT","exchange":"NASDAQ","currency":"USD"}"#
        );
    }
}
