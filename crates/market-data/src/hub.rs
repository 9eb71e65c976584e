use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use meridian_core::{InstrumentKey, MarketSnapshot, TickField};
use meridian_ports::Clock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use crate::error::DataStaleError;

/// What happened to an ingested tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Applied; the snapshot is now at this version
    Applied { version: u64 },
    /// Older than the snapshot's timestamp; not applied
    Stale,
    /// Negative price or size; not applied
    Malformed,
}

/// Ingestion counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub applied: u64,
    pub stale: u64,
    pub malformed: u64,
}

/// Canonical market state for every instrument seen so far
///
/// Each instrument's snapshot lives in a `watch` channel: writers mutate it
/// in place, readers get copies, subscribers see only the latest value.
pub struct MarketDataHub {
    snapshots: DashMap<InstrumentKey, watch::Sender<MarketSnapshot>>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
    applied: AtomicU64,
    stale: AtomicU64,
    malformed: AtomicU64,
}

impl MarketDataHub {
    pub fn new(clock: Arc<dyn Clock>, staleness: Duration) -> Self {
        Self {
            snapshots: DashMap::new(),
            clock,
            staleness,
            applied: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    /// Ingest one field update
    ///
    /// A tick with a timestamp older than the snapshot's is dropped; equal
    /// timestamps apply (several fields often share one exchange timestamp).
    /// Prices must be positive, sizes non-negative.
    pub fn on_tick(
        &self,
        instrument: &InstrumentKey,
        field: TickField,
        value: Decimal,
        timestamp: DateTime<Utc>,
    ) -> TickOutcome {
        let malformed = if field.is_price() {
            value <= Decimal::ZERO
        } else {
            value < Decimal::ZERO
        };
        if malformed {
            warn!("[MD] Dropping malformed {:?} {} for {}", field, value, instrument);
            self.malformed.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Malformed;
        }

        let sender = self
            .snapshots
            .entry(instrument.clone())
            .or_insert_with(|| watch::channel(MarketSnapshot::empty(instrument.clone())).0);

        let mut outcome = TickOutcome::Stale;
        sender.send_if_modified(|snapshot| {
            if let Some(current) = snapshot.timestamp
                && timestamp < current
            {
                return false;
            }
            snapshot.set_field(field, value);
            snapshot.timestamp = Some(timestamp);
            snapshot.version += 1;
            outcome = TickOutcome::Applied {
                version: snapshot.version,
            };
            true
        });

        match outcome {
            TickOutcome::Applied { .. } => {
                self.applied.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                debug!(
                    "[MD] Dropping out-of-order {:?} tick for {} at {}",
                    field, instrument, timestamp
                );
                self.stale.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    /// Copy of the current snapshot, `degraded` set against the staleness threshold
    pub fn get_snapshot(&self, instrument: &InstrumentKey) -> Option<MarketSnapshot> {
        let sender = self.snapshots.get(instrument)?;
        let mut snapshot = sender.borrow().clone();
        snapshot.degraded = snapshot.is_stale(self.clock.now(), self.staleness);
        Some(snapshot)
    }

    /// Current snapshot, or an error if it is missing or degraded
    pub fn checked_snapshot(
        &self,
        instrument: &InstrumentKey,
    ) -> Result<MarketSnapshot, DataStaleError> {
        let snapshot = self
            .get_snapshot(instrument)
            .filter(|s| s.timestamp.is_some())
            .ok_or_else(|| DataStaleError::NoData(instrument.clone()))?;

        if snapshot.degraded {
            let age = snapshot.age(self.clock.now()).unwrap_or_else(Duration::zero);
            return Err(DataStaleError::Stale {
                instrument: instrument.clone(),
                age,
            });
        }
        Ok(snapshot)
    }

    /// Stream of snapshots for one instrument
    ///
    /// Every call starts an independent stream. A subscriber that falls
    /// behind skips straight to the latest snapshot.
    pub fn subscribe_updates(&self, instrument: &InstrumentKey) -> SnapshotStream {
        let sender = self
            .snapshots
            .entry(instrument.clone())
            .or_insert_with(|| watch::channel(MarketSnapshot::empty(instrument.clone())).0);
        let mut receiver = sender.subscribe();
        if receiver.borrow().version > 0 {
            receiver.mark_changed();
        }
        SnapshotStream {
            receiver,
            clock: self.clock.clone(),
            staleness: self.staleness,
        }
    }

    /// Instruments with a snapshot
    pub fn instruments(&self) -> Vec<InstrumentKey> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    /// Valuation price for every instrument that has one
    pub fn mark_prices(&self) -> Vec<(InstrumentKey, Decimal)> {
        self.snapshots
            .iter()
            .filter_map(|e| e.value().borrow().mark_price().map(|p| (e.key().clone(), p)))
            .collect()
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Latest-value stream of one instrument's snapshots
pub struct SnapshotStream {
    receiver: watch::Receiver<MarketSnapshot>,
    clock: Arc<dyn Clock>,
    staleness: Duration,
}

impl SnapshotStream {
    /// Wait for the next update; `None` once the hub is gone
    pub async fn next(&mut self) -> Option<MarketSnapshot> {
        self.receiver.changed().await.ok()?;
        let mut snapshot = self.receiver.borrow_and_update().clone();
        snapshot.degraded = snapshot.is_stale(self.clock.now(), self.staleness);
        Some(snapshot)
    }

    /// Version of the last snapshot this stream saw
    pub fn seen_version(&self) -> u64 {
        self.receiver.borrow().version
    }
}
