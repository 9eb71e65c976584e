//! Market data message types

use chrono::{DateTime, Utc};
use meridian_core::{InstrumentKey, TickField};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One field update for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    pub instrument: InstrumentKey,
    pub field: TickField,
    pub value: Decimal,
    /// Exchange/broker time of the update
    pub timestamp: DateTime<Utc>,
}

impl TickMessage {
    pub fn new(
        instrument: InstrumentKey,
        field: TickField,
        value: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument,
            field,
            value,
            timestamp,
        }
    }
}
