use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Sliding-window order counter per strategy
#[derive(Debug, Default)]
pub struct OrderRateLimiter {
    sent: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl OrderRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders `strategy` sent within `window` before `now`
    pub fn count(&self, strategy: &str, now: DateTime<Utc>, window: Duration) -> usize {
        let mut sent = self.sent.lock();
        match sent.get_mut(strategy) {
            Some(times) => {
                Self::evict(times, now, window);
                times.len()
            }
            None => 0,
        }
    }

    /// Whether one more order fits
    pub fn allows(&self, strategy: &str, now: DateTime<Utc>, window: Duration, max: u32) -> bool {
        self.count(strategy, now, window) < max as usize
    }

    pub fn record(&self, strategy: &str, now: DateTime<Utc>) {
        self.sent
            .lock()
            .entry(strategy.to_string())
            .or_default()
            .push_back(now);
    }

    pub fn reset(&self) {
        self.sent.lock().clear();
    }

    fn evict(times: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
        while times.front().is_some_and(|t| now - *t >= window) {
            times.pop_front();
        }
    }
}
