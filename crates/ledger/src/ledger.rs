use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use log::{debug, info, warn};
use meridian_core::{AccountState, Fill, InstrumentKey, OrderId, Position};
use meridian_gateway::{AccountSummary, AccountTag, PositionReport};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{LedgerError, Result};

/// Result of applying a fill
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// First delivery; position updated
    Applied {
        position: Position,
        realized_delta: Decimal,
    },
    /// Already applied earlier; nothing changed
    Duplicate,
}

impl FillOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, FillOutcome::Applied { .. })
    }
}

/// Ledger and broker disagree about a holding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMismatch {
    pub instrument: InstrumentKey,
    pub ledger_quantity: Decimal,
    pub broker_quantity: Decimal,
}

/// One instrument's position: a writer lock plus the published copy
struct PositionSlot {
    writer: Mutex<()>,
    current: ArcSwap<Position>,
}

impl PositionSlot {
    fn new(position: Position) -> Self {
        Self {
            writer: Mutex::new(()),
            current: ArcSwap::from_pointee(position),
        }
    }
}

/// Realized P&L at the start of the trading day
struct DailyBaseline {
    realized: Decimal,
    since: DateTime<Utc>,
}

pub struct Ledger {
    account_code: String,
    positions: DashMap<InstrumentKey, Arc<PositionSlot>>,
    applied_fills: DashSet<(OrderId, u64)>,
    account: ArcSwap<AccountState>,
    daily: Mutex<DailyBaseline>,
    version: AtomicU64,
}

impl Ledger {
    /// Empty ledger whose trading day starts at `day_start`
    pub fn new(account_code: impl Into<String>, day_start: DateTime<Utc>) -> Self {
        let account_code = account_code.into();
        Self {
            account: ArcSwap::from_pointee(AccountState::empty(account_code.clone())),
            account_code,
            positions: DashMap::new(),
            applied_fills: DashSet::new(),
            daily: Mutex::new(DailyBaseline {
                realized: Decimal::ZERO,
                since: day_start,
            }),
            version: AtomicU64::new(0),
        }
    }

    fn slot(&self, instrument: &InstrumentKey) -> Arc<PositionSlot> {
        self.positions
            .entry(instrument.clone())
            .or_insert_with(|| Arc::new(PositionSlot::new(Position::flat(instrument.clone()))))
            .clone()
    }

    /// Apply a broker-confirmed fill, at most once per `(order id, sequence)`
    pub fn apply_fill(&self, fill: &Fill) -> Result<FillOutcome> {
        if fill.quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity {
                order_id: fill.order_id,
                sequence: fill.sequence,
                quantity: fill.quantity,
            });
        }
        if fill.price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice {
                order_id: fill.order_id,
                sequence: fill.sequence,
                price: fill.price,
            });
        }

        let slot = self.slot(&fill.instrument);
        let _writer = slot.writer.lock();

        if !self.applied_fills.insert(fill.key()) {
            debug!(
                "[LEDGER] Duplicate fill {}#{} ignored",
                fill.order_id, fill.sequence
            );
            return Ok(FillOutcome::Duplicate);
        }

        let mut position = Position::clone(&slot.current.load());
        let realized_delta = position.apply_fill(fill.side, fill.quantity, fill.price, fill.timestamp);
        slot.current.store(Arc::new(position.clone()));
        self.version.fetch_add(1, Ordering::SeqCst);

        info!(
            "[LEDGER] {} {} {} @ {} -> position {} (avg {}, realized {})",
            fill.side,
            fill.quantity,
            fill.instrument,
            fill.price,
            position.quantity,
            position.average_cost,
            realized_delta
        );

        Ok(FillOutcome::Applied {
            position,
            realized_delta,
        })
    }

    /// Whether a fill has already been applied
    pub fn has_applied(&self, order_id: OrderId, sequence: u64) -> bool {
        self.applied_fills.contains(&(order_id, sequence))
    }

    /// Copy of the position (flat if never traded)
    pub fn get_position(&self, instrument: &InstrumentKey) -> Position {
        self.positions
            .get(instrument)
            .map(|slot| Position::clone(&slot.current.load()))
            .unwrap_or_else(|| Position::flat(instrument.clone()))
    }

    /// Copies of every known position
    pub fn positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .map(|e| Position::clone(&e.value().current.load()))
            .collect()
    }

    /// Copy of the latest account state
    pub fn get_account_state(&self) -> AccountState {
        AccountState::clone(&self.account.load())
    }

    /// Revalue a position at `price`; does not touch quantity or realized P&L
    pub fn mark(&self, instrument: &InstrumentKey, price: Decimal) {
        let Some(slot) = self.positions.get(instrument).map(|e| e.value().clone()) else {
            return;
        };
        let _writer = slot.writer.lock();
        let mut position = Position::clone(&slot.current.load());
        position.mark(price);
        slot.current.store(Arc::new(position));
    }

    /// Seed or overwrite a position from a broker report
    ///
    /// Used at startup; realized P&L history is not known for restored
    /// positions and starts at zero.
    pub fn restore_position(&self, report: &PositionReport) -> Result<()> {
        if report.account != self.account_code {
            return Err(LedgerError::ForeignPosition(report.instrument.clone()));
        }
        let slot = self.slot(&report.instrument);
        let _writer = slot.writer.lock();

        let mut restored = Position::restored(
            report.instrument.clone(),
            report.quantity,
            report.average_cost,
            report.timestamp,
        );
        if let Some(mark) = slot.current.load().mark_price {
            restored.mark(mark);
        }
        slot.current.store(Arc::new(restored));
        self.version.fetch_add(1, Ordering::SeqCst);

        info!(
            "[LEDGER] Restored {} {} @ {}",
            report.instrument, report.quantity, report.average_cost
        );
        Ok(())
    }

    /// Compare ledger quantities with broker-reported ones
    ///
    /// Instruments the broker does not report are expected to be flat.
    pub fn reconcile_positions(&self, reports: &[PositionReport]) -> Vec<PositionMismatch> {
        let mut mismatches = Vec::new();

        for report in reports.iter().filter(|r| r.account == self.account_code) {
            let ledger_quantity = self.get_position(&report.instrument).quantity;
            if ledger_quantity != report.quantity {
                mismatches.push(PositionMismatch {
                    instrument: report.instrument.clone(),
                    ledger_quantity,
                    broker_quantity: report.quantity,
                });
            }
        }

        for position in self.positions() {
            let reported = reports
                .iter()
                .any(|r| r.instrument == position.instrument && r.account == self.account_code);
            if !reported && !position.is_flat() {
                mismatches.push(PositionMismatch {
                    instrument: position.instrument.clone(),
                    ledger_quantity: position.quantity,
                    broker_quantity: Decimal::ZERO,
                });
            }
        }

        for m in &mismatches {
            warn!(
                "[LEDGER] Position mismatch on {}: ledger {} vs broker {}",
                m.instrument, m.ledger_quantity, m.broker_quantity
            );
        }
        mismatches
    }

    /// Replace account state from a broker summary
    ///
    /// Summaries older than the current state are ignored; tags missing from
    /// the summary keep their previous value. Returns whether state changed.
    pub fn apply_account_summary(&self, summary: &AccountSummary) -> Result<bool> {
        if summary.account != self.account_code {
            return Err(LedgerError::WrongAccount {
                expected: self.account_code.clone(),
                got: summary.account.clone(),
            });
        }

        let mut applied = false;
        self.account.rcu(|current| {
            if current.updated_at.is_some_and(|at| summary.timestamp < at) {
                applied = false;
                return Arc::clone(current);
            }
            applied = true;

            let cash = summary
                .get(AccountTag::TotalCashValue)
                .or_else(|| summary.get(AccountTag::CashBalance))
                .unwrap_or(current.cash_balance);

            Arc::new(AccountState {
                account: current.account.clone(),
                cash_balance: cash,
                net_liquidation: summary
                    .get(AccountTag::NetLiquidation)
                    .unwrap_or(current.net_liquidation),
                margin_used: summary
                    .get(AccountTag::MaintMarginReq)
                    .unwrap_or(current.margin_used),
                realized_pnl: summary
                    .get(AccountTag::RealizedPnL)
                    .unwrap_or(current.realized_pnl),
                unrealized_pnl: summary
                    .get(AccountTag::UnrealizedPnL)
                    .unwrap_or(current.unrealized_pnl),
                updated_at: Some(summary.timestamp),
                version: current.version + 1,
            })
        });

        if applied {
            debug!(
                "[LEDGER] Account {} updated (net liq {})",
                self.account_code,
                self.account.load().net_liquidation
            );
        } else {
            debug!("[LEDGER] Ignoring out-of-date account summary");
        }
        Ok(applied)
    }

    /// Sum of absolute notional across instruments
    pub fn gross_exposure(&self) -> Decimal {
        self.positions().iter().map(Position::notional).sum()
    }

    /// Realized P&L since the daily reset plus current unrealized P&L
    pub fn daily_pnl(&self) -> Decimal {
        let positions = self.positions();
        let realized: Decimal = positions.iter().map(|p| p.realized_pnl).sum();
        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        realized - self.daily.lock().realized + unrealized
    }

    /// Start a new trading day
    pub fn reset_daily(&self, now: DateTime<Utc>) {
        let realized: Decimal = self.positions().iter().map(|p| p.realized_pnl).sum();
        let mut daily = self.daily.lock();
        info!(
            "[LEDGER] Daily reset: realized since {} was {}",
            daily.since,
            realized - daily.realized
        );
        daily.realized = realized;
        daily.since = now;
    }

    /// When the current trading day started
    pub fn day_start(&self) -> DateTime<Utc> {
        self.daily.lock().since
    }

    /// Incremented on every position change
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn account_code(&self) -> &str {
        &self.account_code
    }
}
