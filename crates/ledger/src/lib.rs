//! Meridian Position & Account Ledger
//!
//! Authoritative in-memory record of positions and account state.
//!
//! - Positions change only through broker-confirmed fills, never through
//!   order submission. Each fill is applied at most once, keyed by
//!   `(order id, execution sequence)`.
//! - Writes are serialized per instrument; reads are lock-free copies of
//!   the last published state (copy-on-write via `arc-swap`).
//! - Account state is replaced wholesale from broker account summaries.

pub mod error;
pub mod ledger;

pub use error::{LedgerError, Result};
pub use ledger::{FillOutcome, Ledger, PositionMismatch};
