use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;
use crate::instruments::InstrumentKey;

/// How much a strategy wants to trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IntentQuantity {
    /// Trade this unsigned quantity in the intent's direction
    Delta(Decimal),
    /// Bring the signed position to exactly this quantity
    Target(Decimal),
}

/// What a strategy would like to do; not yet an order
///
/// Consumed by the risk manager and discarded after evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub instrument: InstrumentKey,
    pub direction: Side,
    pub quantity: IntentQuantity,
    pub strategy_id: String,
    /// Strategy's own conviction in [0, 1]
    pub confidence: Decimal,
    /// Higher is evaluated first when several intents compete
    pub priority: i32,
    /// Submit as a limit order at this price; market order when absent
    pub limit_price: Option<Decimal>,
    pub generated_at: DateTime<Utc>,
}

impl TradeIntent {
    /// Trade `quantity` in `direction`
    pub fn delta(
        instrument: InstrumentKey,
        direction: Side,
        quantity: Decimal,
        strategy_id: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument,
            direction,
            quantity: IntentQuantity::Delta(quantity.abs()),
            strategy_id: strategy_id.into(),
            confidence: Decimal::ONE,
            priority: 0,
            limit_price: None,
            generated_at,
        }
    }

    /// Move the position to `target`
    ///
    /// `direction` records the sign of the target; the effective side is only
    /// known once the current position is, see [`TradeIntent::resolve`].
    pub fn target(
        instrument: InstrumentKey,
        target: Decimal,
        strategy_id: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument,
            direction: Side::from_delta(target),
            quantity: IntentQuantity::Target(target),
            strategy_id: strategy_id.into(),
            confidence: Decimal::ONE,
            priority: 0,
            limit_price: None,
            generated_at,
        }
    }

    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    /// Signed change to the position this intent asks for
    pub fn signed_delta(&self, current_position: Decimal) -> Decimal {
        match self.quantity {
            IntentQuantity::Delta(qty) => self.direction.signed(qty),
            IntentQuantity::Target(target) => target - current_position,
        }
    }

    /// Effective (side, unsigned quantity) given the current position
    pub fn resolve(&self, current_position: Decimal) -> (Side, Decimal) {
        let delta = self.signed_delta(current_position);
        (Side::from_delta(delta), delta.abs())
    }

    /// True if executing the intent leaves the position no larger in absolute
    /// terms and on the same side (or flat)
    pub fn is_risk_reducing(&self, current_position: Decimal) -> bool {
        let delta = self.signed_delta(current_position);
        if delta.is_zero() {
            return true;
        }
        let resulting = current_position + delta;
        resulting.abs() <= current_position.abs()
            && (resulting.is_zero()
                || resulting.is_sign_positive() == current_position.is_sign_positive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> InstrumentKey {
        InstrumentKey::stock("AAPL")
    }

    #[test]
    fn test_delta_resolves_to_direction() {
        let intent = TradeIntent::delta(key(), Side::Sell, dec!(50), "s", Utc::now());
        assert_eq!(intent.signed_delta(dec!(10)), dec!(-50));
        assert_eq!(intent.resolve(dec!(10)), (Side::Sell, dec!(50)));
    }

    #[test]
    fn test_target_resolves_against_position() {
        let intent = TradeIntent::target(key(), dec!(100), "s", Utc::now());
        assert_eq!(intent.resolve(dec!(30)), (Side::Buy, dec!(70)));
        assert_eq!(intent.resolve(dec!(130)), (Side::Sell, dec!(30)));
        assert_eq!(intent.resolve(dec!(100)).1, Decimal::ZERO);
    }

    #[test]
    fn test_risk_reducing_classification() {
        let close = TradeIntent::delta(key(), Side::Sell, dec!(100), "s", Utc::now());
        assert!(close.is_risk_reducing(dec!(100)));
        assert!(close.is_risk_reducing(dec!(150)));
        // Flips a 60 long into a 40 short
        assert!(!close.is_risk_reducing(dec!(60)));
        // Opens from flat
        assert!(!close.is_risk_reducing(Decimal::ZERO));

        let flatten = TradeIntent::target(key(), Decimal::ZERO, "s", Utc::now());
        assert!(flatten.is_risk_reducing(dec!(-75)));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let intent =
            TradeIntent::delta(key(), Side::Buy, dec!(1), "s", Utc::now()).with_confidence(dec!(3));
        assert_eq!(intent.confidence, Decimal::ONE);
    }
}
