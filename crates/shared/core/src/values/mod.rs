use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Price value - uses Decimal for precision
pub type Price = Decimal;

/// Quantity value - uses Decimal for precision
/// Signed where it represents a position, unsigned on orders and fills
pub type Quantity = Decimal;

/// Cash / P&L amount in the account currency
pub type Money = Decimal;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Ticker symbol of a tradeable instrument
pub type Symbol = String;
