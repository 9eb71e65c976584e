use serde::{Deserialize, Serialize};

/// Field carried by a single broker tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickField {
    Last,
    LastSize,
    Bid,
    BidSize,
    Ask,
    AskSize,
    /// Cumulative session volume
    Volume,
    /// Previous session close
    Close,
}

impl TickField {
    /// Price fields (as opposed to sizes and volume)
    pub fn is_price(&self) -> bool {
        matches!(
            self,
            TickField::Last | TickField::Bid | TickField::Ask | TickField::Close
        )
    }
}
