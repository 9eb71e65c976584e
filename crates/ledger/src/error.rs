use meridian_core::{InstrumentKey, OrderId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Fill {order_id}#{sequence} has non-positive quantity {quantity}")]
    InvalidQuantity {
        order_id: OrderId,
        sequence: u64,
        quantity: Decimal,
    },

    #[error("Fill {order_id}#{sequence} has non-positive price {price}")]
    InvalidPrice {
        order_id: OrderId,
        sequence: u64,
        price: Decimal,
    },

    #[error("Account summary for {got} does not belong to {expected}")]
    WrongAccount { expected: String, got: String },

    #[error("Position report for {0} is for another account")]
    ForeignPosition(InstrumentKey),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
