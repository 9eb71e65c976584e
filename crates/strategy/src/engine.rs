//! Strategy Engine
//!
//! Keeps the registry of strategies, a price window per instrument, and the
//! queue of intents waiting for risk evaluation.

use dashmap::DashMap;
use log::{debug, error, info, warn};
use meridian_core::{InstrumentKey, MarketSnapshot, Position, TradeIntent};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Result, StrategyError};
use crate::history::PriceHistory;
use crate::queue::IntentQueue;
use crate::strategy::Strategy;

/// When strategies run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum EvaluationCadence {
    /// On every snapshot update for a relevant instrument
    OnUpdate,
    /// On a fixed timer, against the latest snapshot of each instrument
    Interval { period_ms: u64 },
}

impl EvaluationCadence {
    pub fn period(&self) -> Option<Duration> {
        match self {
            EvaluationCadence::OnUpdate => None,
            EvaluationCadence::Interval { period_ms } => Some(Duration::from_millis(*period_ms)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyEngineConfig {
    pub cadence: EvaluationCadence,
    /// Prices kept per instrument for strategies to look back on
    pub history_window: usize,
    /// How long a cycle waits on its strategies; a strategy still running
    /// after that counts as failed and its result is discarded
    pub evaluation_timeout: Duration,
}

impl Default for StrategyEngineConfig {
    fn default() -> Self {
        Self {
            cadence: EvaluationCadence::OnUpdate,
            history_window: 256,
            evaluation_timeout: Duration::from_secs(1),
        }
    }
}

/// What one evaluation cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Strategies that ran
    pub evaluated: usize,
    /// Intents added to the queue
    pub emitted: usize,
    /// Strategies that errored or panicked
    pub failed: Vec<String>,
    /// Snapshot was degraded, nothing ran
    pub degraded: bool,
}

struct Registration {
    strategy: Arc<dyn Strategy>,
    enabled: bool,
}

pub struct StrategyEngine {
    config: StrategyEngineConfig,
    registry: RwLock<Vec<Registration>>,
    histories: DashMap<InstrumentKey, PriceHistory>,
    queue: Mutex<IntentQueue>,
    accepting: AtomicBool,
    cycles: AtomicU64,
    failures: AtomicU64,
}

impl StrategyEngine {
    pub fn new(config: StrategyEngineConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(Vec::new()),
            histories: DashMap::new(),
            queue: Mutex::new(IntentQueue::new()),
            accepting: AtomicBool::new(true),
            cycles: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn cadence(&self) -> EvaluationCadence {
        self.config.cadence
    }

    /// Add a strategy; names must be unique
    pub fn register(&self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.iter().any(|r| r.strategy.name() == strategy.name()) {
            return Err(StrategyError::DuplicateName(strategy.name().to_string()));
        }
        info!("[STRAT] Registered strategy {}", strategy.name());
        registry.push(Registration {
            strategy,
            enabled: true,
        });
        Ok(())
    }

    pub fn deregister(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let before = registry.len();
        registry.retain(|r| r.strategy.name() != name);
        if registry.len() == before {
            return Err(StrategyError::UnknownStrategy(name.to_string()));
        }
        info!("[STRAT] Deregistered strategy {}", name);
        Ok(())
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut registry = self.registry.write();
        let registration = registry
            .iter_mut()
            .find(|r| r.strategy.name() == name)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))?;
        registration.enabled = enabled;
        info!(
            "[STRAT] Strategy {} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Registered strategy names with their enabled flag, in registration order
    pub fn strategies(&self) -> Vec<(String, bool)> {
        self.registry
            .read()
            .iter()
            .map(|r| (r.strategy.name().to_string(), r.enabled))
            .collect()
    }

    /// Instruments any registered strategy asked for
    pub fn instruments(&self) -> Vec<InstrumentKey> {
        let mut all = Vec::new();
        for registration in self.registry.read().iter() {
            for instrument in registration.strategy.instruments() {
                if !all.contains(&instrument) {
                    all.push(instrument);
                }
            }
        }
        all
    }

    /// Run every relevant enabled strategy against `snapshot`
    ///
    /// Strategies run in parallel on the blocking pool. Their intents are
    /// queued in registration order regardless of completion order. A
    /// strategy that errors or panics is logged and skipped for this cycle.
    pub async fn evaluate(&self, snapshot: &MarketSnapshot, position: &Position) -> CycleReport {
        let mut report = CycleReport::default();

        if !self.is_accepting() {
            return report;
        }
        if snapshot.degraded {
            debug!("[STRAT] {} degraded, no signal", snapshot.instrument);
            report.degraded = true;
            return report;
        }

        let history = {
            let mut entry = self
                .histories
                .entry(snapshot.instrument.clone())
                .or_insert_with(|| {
                    PriceHistory::new(snapshot.instrument.clone(), self.config.history_window)
                });
            entry.record(snapshot);
            entry.value().clone()
        };

        let strategies: Vec<Arc<dyn Strategy>> = self
            .registry
            .read()
            .iter()
            .filter(|r| r.enabled && r.strategy.wants(&snapshot.instrument))
            .map(|r| r.strategy.clone())
            .collect();

        let snapshot = Arc::new(snapshot.clone());
        let position = Arc::new(position.clone());
        let history = Arc::new(history);

        let handles: Vec<_> = strategies
            .into_iter()
            .map(|strategy| {
                let name = strategy.name().to_string();
                let snapshot = snapshot.clone();
                let position = position.clone();
                let history = history.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    strategy.evaluate(&snapshot, &position, &history)
                });
                (name, handle)
            })
            .collect();

        let deadline = tokio::time::Instant::now() + self.config.evaluation_timeout;
        let mut intents = Vec::new();
        for (name, handle) in handles {
            report.evaluated += 1;
            let Ok(joined) = tokio::time::timeout_at(deadline, handle).await else {
                let e = StrategyError::TimedOut {
                    strategy: name.clone(),
                    limit_ms: self.config.evaluation_timeout.as_millis() as u64,
                };
                error!("[STRAT] {}", e);
                report.failed.push(name);
                continue;
            };
            match joined {
                Ok(Ok(Some(intent))) => {
                    if intent.instrument != snapshot.instrument {
                        warn!(
                            "[STRAT] {} emitted intent for {} while evaluating {}, dropped",
                            name, intent.instrument, snapshot.instrument
                        );
                        continue;
                    }
                    debug!(
                        "[STRAT] {} -> {} {} {:?}",
                        name, intent.direction, intent.instrument, intent.quantity
                    );
                    intents.push(intent);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!("[STRAT] {}", e);
                    report.failed.push(name);
                }
                Err(join) => {
                    let e = if join.is_panic() {
                        StrategyError::Panicked {
                            strategy: name.clone(),
                        }
                    } else {
                        StrategyError::evaluation(&name, join.to_string())
                    };
                    error!("[STRAT] {}", e);
                    report.failed.push(name);
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        // Halted while strategies were running
        if !self.is_accepting() {
            return report;
        }

        report.emitted = intents.len();
        let mut queue = self.queue.lock();
        for intent in intents {
            queue.push(intent);
        }
        report
    }

    /// Next intent to hand to risk evaluation
    pub fn next_intent(&self) -> Option<TradeIntent> {
        self.queue.lock().pop()
    }

    /// All queued intents, in queue order
    pub fn drain_intents(&self) -> Vec<TradeIntent> {
        self.queue.lock().drain()
    }

    pub fn pending_intents(&self) -> usize {
        self.queue.lock().len()
    }

    /// Stop producing intents; queued ones are discarded and counted
    pub fn stop_accepting(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let mut queue = self.queue.lock();
        let discarded = queue.len();
        queue.clear();
        if discarded > 0 {
            info!("[STRAT] Stopped accepting, discarded {} queued intent(s)", discarded);
        } else {
            info!("[STRAT] Stopped accepting intents");
        }
        discarded
    }

    pub fn resume_accepting(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        info!("[STRAT] Accepting intents");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn history(&self, instrument: &InstrumentKey) -> Option<PriceHistory> {
        self.histories.get(instrument).map(|h| h.value().clone())
    }

    /// (cycles run, strategy failures)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.cycles.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}
