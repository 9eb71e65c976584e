//! Ordered intent queue
//!
//! Higher priority first; equal priorities come out in insertion order,
//! which is the order strategies were evaluated in.

use meridian_core::TradeIntent;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;

pub struct IntentQueue {
    order: PriorityQueue<u64, (i32, Reverse<u64>)>,
    intents: HashMap<u64, TradeIntent>,
    next_seq: u64,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self {
            order: PriorityQueue::new(),
            intents: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, intent: TradeIntent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push(seq, (intent.priority, Reverse(seq)));
        self.intents.insert(seq, intent);
    }

    pub fn pop(&mut self) -> Option<TradeIntent> {
        let (seq, _) = self.order.pop()?;
        self.intents.remove(&seq)
    }

    /// Remove everything, in queue order
    pub fn drain(&mut self) -> Vec<TradeIntent> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(intent) = self.pop() {
            drained.push(intent);
        }
        drained
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.intents.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for IntentQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::{InstrumentKey, Side};
    use rust_decimal_macros::dec;

    fn intent(strategy: &str, priority: i32) -> TradeIntent {
        TradeIntent::delta(
            InstrumentKey::stock("AAPL"),
            Side::Buy,
            dec!(10),
            strategy,
            Utc::now(),
        )
        .with_priority(priority)
    }

    #[test]
    fn test_priority_then_insertion_order() {
        let mut queue = IntentQueue::new();
        queue.push(intent("a", 0));
        queue.push(intent("b", 5));
        queue.push(intent("c", 0));
        queue.push(intent("d", 5));

        let order: Vec<_> = queue.drain().into_iter().map(|i| i.strategy_id).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
        assert!(queue.is_empty());
    }
}
