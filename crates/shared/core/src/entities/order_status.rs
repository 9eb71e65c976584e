use serde::{Deserialize, Serialize};

/// Order lifecycle status
///
/// ```text
/// Pending ──ack──► Submitted ──fill──► PartiallyFilled ◄─┐
///    │                 │  │                 │  │  └─fill──┘
///    └──reject──► Rejected  └─fill──► Filled ◄─┘  │
///                      └──cancel──► Cancelled ◄───┘
/// ```
///
/// `NeedsAttention` sits outside the normal flow: reconciliation parks an
/// order there when local and broker views disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged by the broker
    Pending,
    /// Acknowledged by the broker (broker order id assigned)
    Submitted,
    /// Some but not all quantity filled
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Canceled at the broker
    Cancelled,
    /// Rejected by the broker or lost during a reconnect
    Rejected,
    /// Local and broker state disagree; frozen until an operator steps in
    NeedsAttention,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Returns true if the order may still trade
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Submitted | OrderStatus::PartiallyFilled
        )
    }

    /// Returns true if a cancel request is valid from this state
    pub fn accepts_cancel(&self) -> bool {
        matches!(self, OrderStatus::Submitted | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::NeedsAttention => "NeedsAttention",
        };
        f.write_str(name)
    }
}
