use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;
use crate::instruments::InstrumentKey;

/// Holdings in a single instrument
///
/// Quantity is signed (positive = long, negative = short). Average cost is
/// weighted-average: adding to a position blends the fill price in, reducing
/// it leaves the average untouched, and flipping through zero restarts it at
/// the fill price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: InstrumentKey,
    /// Current position quantity (positive=long, negative=short)
    pub quantity: Decimal,
    /// Weighted-average entry price, zero when flat
    pub average_cost: Decimal,
    /// Sum of realized P&L over every applied fill
    pub realized_pnl: Decimal,
    /// P&L of the open quantity at `mark_price`
    pub unrealized_pnl: Decimal,
    /// Last price used for unrealized P&L
    pub mark_price: Option<Decimal>,
    /// Number of fills applied
    pub fill_count: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    /// A flat position
    pub fn flat(instrument: InstrumentKey) -> Self {
        Self {
            instrument,
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            mark_price: None,
            fill_count: 0,
            updated_at: None,
        }
    }

    /// A position as reported by the broker (no fill history)
    pub fn restored(
        instrument: InstrumentKey,
        quantity: Decimal,
        average_cost: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            quantity,
            average_cost: if quantity.is_zero() {
                Decimal::ZERO
            } else {
                average_cost
            },
            updated_at: Some(at),
            ..Self::flat(instrument)
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Apply a fill, returning the realized P&L it produced
    pub fn apply_fill(
        &mut self,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Decimal {
        let signed_qty = side.signed(quantity);
        let mut realized = Decimal::ZERO;

        let reducing = (self.quantity > Decimal::ZERO && signed_qty < Decimal::ZERO)
            || (self.quantity < Decimal::ZERO && signed_qty > Decimal::ZERO);

        if reducing {
            let close_qty = signed_qty.abs().min(self.quantity.abs());
            realized = if self.quantity > Decimal::ZERO {
                close_qty * (price - self.average_cost)
            } else {
                close_qty * (self.average_cost - price)
            };
        }

        let new_quantity = self.quantity + signed_qty;

        if new_quantity.is_zero() {
            self.average_cost = Decimal::ZERO;
        } else if !reducing {
            let total_cost = self.quantity.abs() * self.average_cost + quantity * price;
            self.average_cost = total_cost / new_quantity.abs();
        } else if new_quantity.is_sign_positive() != self.quantity.is_sign_positive() {
            // Flipped through zero; the remainder was opened at this fill
            self.average_cost = price;
        }

        self.quantity = new_quantity;
        self.realized_pnl += realized;
        self.fill_count += 1;
        self.updated_at = Some(at);
        self.revalue();

        realized
    }

    /// Revalue the open quantity at `price`
    pub fn mark(&mut self, price: Decimal) {
        self.mark_price = Some(price);
        self.revalue();
    }

    fn revalue(&mut self) {
        self.unrealized_pnl = match self.mark_price {
            Some(mark) if !self.quantity.is_zero() => {
                self.quantity * (mark - self.average_cost)
            }
            _ => Decimal::ZERO,
        };
    }

    /// Absolute notional at the mark (average cost when never marked)
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price.unwrap_or(self.average_cost)
    }

    /// Realized + unrealized
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}
