//! Account message types

use chrono::{DateTime, Utc};
use meridian_core::InstrumentKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Account summary tags the engine requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountTag {
    NetLiquidation,
    TotalCashValue,
    CashBalance,
    RealizedPnL,
    UnrealizedPnL,
    MaintMarginReq,
}

impl AccountTag {
    pub const ALL: [AccountTag; 6] = [
        AccountTag::NetLiquidation,
        AccountTag::TotalCashValue,
        AccountTag::CashBalance,
        AccountTag::RealizedPnL,
        AccountTag::UnrealizedPnL,
        AccountTag::MaintMarginReq,
    ];

    /// Broker's name for the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountTag::NetLiquidation => "NetLiquidation",
            AccountTag::TotalCashValue => "TotalCashValue",
            AccountTag::CashBalance => "CashBalance",
            AccountTag::RealizedPnL => "RealizedPnL",
            AccountTag::UnrealizedPnL => "UnrealizedPnL",
            AccountTag::MaintMarginReq => "MaintMarginReq",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

/// Tagged account values reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: String,
    pub currency: String,
    pub values: BTreeMap<AccountTag, Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl AccountSummary {
    pub fn new(account: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            account: account.into(),
            currency: "USD".to_string(),
            values: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_value(mut self, tag: AccountTag, value: Decimal) -> Self {
        self.values.insert(tag, value);
        self
    }

    /// Record a raw `(tag, value)` pair; unknown tags are ignored
    pub fn insert_raw(&mut self, tag: &str, value: Decimal) -> bool {
        match AccountTag::parse(tag) {
            Some(tag) => {
                self.values.insert(tag, value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, tag: AccountTag) -> Option<Decimal> {
        self.values.get(&tag).copied()
    }
}

/// Broker-reported holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub account: String,
    pub instrument: InstrumentKey,
    /// Signed quantity
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Events on the account stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountEvent {
    Summary(AccountSummary),
    Position(PositionReport),
}
