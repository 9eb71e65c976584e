use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-reported account summary
///
/// Replaced wholesale on each broker account-summary event; readers always
/// get a consistent copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account code at the broker
    pub account: String,
    pub cash_balance: Decimal,
    pub net_liquidation: Decimal,
    pub margin_used: Decimal,
    /// Broker-side realized P&L for the session
    pub realized_pnl: Decimal,
    /// Broker-side unrealized P&L
    pub unrealized_pnl: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
    /// Incremented on every accepted update
    pub version: u64,
}

impl AccountState {
    /// An account nothing has been heard about yet
    pub fn empty(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            cash_balance: Decimal::ZERO,
            net_liquidation: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            updated_at: None,
            version: 0,
        }
    }

    /// Margin headroom (net liquidation minus margin in use)
    pub fn available_funds(&self) -> Decimal {
        self.net_liquidation - self.margin_used
    }
}
