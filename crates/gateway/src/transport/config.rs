//! Subscription topics

use meridian_core::InstrumentKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something the engine asks the broker to stream
///
/// Topics are kept in the connection manager's registry and re-issued after
/// every reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Quotes and trades for one instrument: `md.AAPL@SMART/USD`
    MarketData(InstrumentKey),
    /// Account value and position updates: `account.DU1234567`
    Account(String),
    /// Order status and execution updates: `orders`
    Orders,
}

impl Topic {
    /// Logical subject name, used for logging
    pub fn subject(&self) -> String {
        match self {
            Topic::MarketData(instrument) => format!("md.{}", instrument),
            Topic::Account(account) => format!("account.{}", account),
            Topic::Orders => "orders".to_string(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        assert_eq!(
            Topic::MarketData(InstrumentKey::stock("AAPL")).subject(),
            "md.AAPL@SMART/USD"
        );
        assert_eq!(Topic::Account("DU1234567".into()).subject(), "account.DU1234567");
        assert_eq!(Topic::Orders.to_string(), "orders");
    }
}
