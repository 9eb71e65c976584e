//! Risk decisions

use meridian_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which check produced a rejection or rescale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCheck {
    TradingHalted,
    PositionLimit,
    ExposureLimit,
    DailyLossLimit,
    OrderRateLimit,
    /// Intent asks for no change to the position
    NothingToTrade,
}

impl RiskCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCheck::TradingHalted => "trading halted",
            RiskCheck::PositionLimit => "position limit",
            RiskCheck::ExposureLimit => "exposure limit",
            RiskCheck::DailyLossLimit => "daily loss limit",
            RiskCheck::OrderRateLimit => "order rate limit",
            RiskCheck::NothingToTrade => "nothing to trade",
        }
    }
}

impl fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether resubmitting the same intent later could succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionClass {
    Hard,
    RetryLater,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRejection {
    pub reason: RiskCheck,
    pub class: RejectionClass,
    pub detail: String,
}

impl RiskRejection {
    pub fn hard(reason: RiskCheck, detail: impl Into<String>) -> Self {
        Self {
            reason,
            class: RejectionClass::Hard,
            detail: detail.into(),
        }
    }

    pub fn retry_later(reason: RiskCheck, detail: impl Into<String>) -> Self {
        Self {
            reason,
            class: RejectionClass::RetryLater,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class == RejectionClass::RetryLater
    }
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Outcome of evaluating one intent
///
/// `side` is the resolved direction; target intents only know theirs once
/// the current position is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskDecision {
    Approve {
        side: Side,
        quantity: Decimal,
    },
    Reject(RiskRejection),
    Rescale {
        side: Side,
        quantity: Decimal,
        reason: RiskCheck,
    },
}

impl RiskDecision {
    /// Side and quantity to trade, if any
    pub fn order_quantity(&self) -> Option<(Side, Decimal)> {
        match self {
            RiskDecision::Approve { side, quantity } | RiskDecision::Rescale { side, quantity, .. } => {
                Some((*side, *quantity))
            }
            RiskDecision::Reject(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RiskDecision::Reject(_))
    }

    pub fn rejection(&self) -> Option<&RiskRejection> {
        match self {
            RiskDecision::Reject(r) => Some(r),
            _ => None,
        }
    }
}
