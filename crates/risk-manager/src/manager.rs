//! Risk Manager
//!
//! Evaluates every trade intent before it can become an order:
//! - Position limit per instrument (rescale or reject)
//! - Aggregate gross exposure (rescale or reject)
//! - Daily loss limit (only risk-reducing intents pass once breached)
//! - Order rate per strategy (retry later)
//!
//! Checks run in that order and the first one that fails decides: a rescale
//! from the position limit is returned as is. The manual kill switch is
//! checked before all of them.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use meridian_core::{AccountState, Position, Side, TradeIntent};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::decision::{RiskCheck, RiskDecision, RiskRejection};
use crate::error::Result;
use crate::limits::{BreachAction, RiskLimits};
use crate::rate::OrderRateLimiter;

/// Everything an evaluation looks at besides the intent itself
#[derive(Debug, Clone)]
pub struct RiskContext {
    /// Ledger position for the intent's instrument
    pub position: Position,
    /// Signed quantity still open in working orders for the instrument
    pub pending_quantity: Decimal,
    pub account: AccountState,
    /// Realized since day start plus unrealized
    pub daily_pnl: Decimal,
    /// Gross notional across all instruments
    pub gross_exposure: Decimal,
    /// Price used to value the intent when it has no limit price
    pub mark_price: Option<Decimal>,
    pub now: DateTime<Utc>,
}

impl RiskContext {
    /// Position as it will be once working orders complete
    pub fn effective_position(&self) -> Decimal {
        self.position.quantity + self.pending_quantity
    }
}

#[derive(Debug, Clone)]
enum Halt {
    Manual(String),
    DailyLoss(String),
}

/// Decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskStats {
    pub approved: u64,
    pub rescaled: u64,
    pub rejected: u64,
    pub retry_later: u64,
}

pub struct RiskManager {
    active: ArcSwap<RiskLimits>,
    staged: Mutex<Option<RiskLimits>>,
    rate: OrderRateLimiter,
    halt: RwLock<Option<Halt>>,
    approved: AtomicU64,
    rescaled: AtomicU64,
    rejected: AtomicU64,
    retry_later: AtomicU64,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            active: ArcSwap::from_pointee(limits),
            staged: Mutex::new(None),
            rate: OrderRateLimiter::new(),
            halt: RwLock::new(None),
            approved: AtomicU64::new(0),
            rescaled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            retry_later: AtomicU64::new(0),
        })
    }

    /// Limits in force for the current cycle
    pub fn limits(&self) -> Arc<RiskLimits> {
        self.active.load_full()
    }

    /// Stage new limits; they apply from the next [`RiskManager::begin_cycle`]
    pub fn update_limits(&self, limits: RiskLimits) -> Result<()> {
        limits.validate()?;
        info!("[RISK] New limits staged");
        *self.staged.lock() = Some(limits);
        Ok(())
    }

    /// Start an evaluation cycle, activating staged limits if any
    pub fn begin_cycle(&self) -> bool {
        match self.staged.lock().take() {
            Some(limits) => {
                info!(
                    "[RISK] Limits activated: max position {}, max exposure {}, max daily loss {}",
                    limits.max_position, limits.max_aggregate_exposure, limits.max_daily_loss
                );
                self.active.store(Arc::new(limits));
                true
            }
            None => false,
        }
    }

    /// Decide on one intent
    ///
    /// An approval or rescale counts against the strategy's order rate, so
    /// callers should evaluate an intent only when they intend to submit it.
    pub fn evaluate(&self, intent: &TradeIntent, ctx: &RiskContext) -> RiskDecision {
        let limits = self.limits();
        let decision = self.decide(intent, ctx, &limits);

        match &decision {
            RiskDecision::Approve { side, quantity } => {
                self.rate.record(&intent.strategy_id, ctx.now);
                self.approved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "[RISK] Approved {} {} {} for {}",
                    side, quantity, intent.instrument, intent.strategy_id
                );
            }
            RiskDecision::Rescale {
                side,
                quantity,
                reason,
            } => {
                self.rate.record(&intent.strategy_id, ctx.now);
                self.rescaled.fetch_add(1, Ordering::Relaxed);
                info!(
                    "[RISK] Rescaled {} {} to {} for {} ({})",
                    side, intent.instrument, quantity, intent.strategy_id, reason
                );
            }
            RiskDecision::Reject(rejection) => {
                if rejection.is_retryable() {
                    self.retry_later.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    "[RISK] Rejected {} intent on {}: {}",
                    intent.strategy_id, intent.instrument, rejection
                );
            }
        }
        decision
    }

    fn decide(&self, intent: &TradeIntent, ctx: &RiskContext, limits: &RiskLimits) -> RiskDecision {
        let current = ctx.effective_position();
        let (side, requested) = intent.resolve(current);
        if requested.is_zero() {
            return RiskDecision::Reject(RiskRejection::hard(
                RiskCheck::NothingToTrade,
                format!("position already at {}", current),
            ));
        }
        let reducing = intent.is_risk_reducing(current);

        // Operator kill switch sits in front of every limit check
        if !reducing && let Some(Halt::Manual(reason)) = self.halt.read().as_ref() {
            return RiskDecision::Reject(RiskRejection::hard(RiskCheck::TradingHalted, reason.clone()));
        }

        if !reducing {
            if let Some(decision) = Self::check_position(intent, ctx, limits, side, requested) {
                return decision;
            }
            if let Some(decision) = Self::check_exposure(intent, ctx, limits, side, requested) {
                return decision;
            }
            if let Some(rejection) = self.check_daily_loss(ctx, limits) {
                return RiskDecision::Reject(rejection);
            }
        }

        // 4. Order rate
        if !self.rate.allows(
            &intent.strategy_id,
            ctx.now,
            limits.rate_window(),
            limits.max_orders_per_window,
        ) {
            return RiskDecision::Reject(RiskRejection::retry_later(
                RiskCheck::OrderRateLimit,
                format!(
                    "{} already sent {} orders in {}ms",
                    intent.strategy_id, limits.max_orders_per_window, limits.rate_window_ms
                ),
            ));
        }

        RiskDecision::Approve {
            side,
            quantity: requested,
        }
    }

    /// 1. Position limit
    fn check_position(
        intent: &TradeIntent,
        ctx: &RiskContext,
        limits: &RiskLimits,
        side: Side,
        quantity: Decimal,
    ) -> Option<RiskDecision> {
        let current = ctx.effective_position();
        let max = limits.position_limit(&intent.instrument);
        let resulting = current + side.signed(quantity);
        if resulting.abs() <= max {
            return None;
        }

        let allowed = match side {
            Side::Buy => max - current,
            Side::Sell => max + current,
        };
        let detail = format!(
            "{} {} would take position to {}, limit {}",
            side, quantity, resulting, max
        );
        Some(Self::shrink(limits, side, allowed, RiskCheck::PositionLimit, detail))
    }

    /// 2. Aggregate exposure
    fn check_exposure(
        intent: &TradeIntent,
        ctx: &RiskContext,
        limits: &RiskLimits,
        side: Side,
        quantity: Decimal,
    ) -> Option<RiskDecision> {
        let price = match intent.limit_price.or(ctx.mark_price) {
            Some(price) if price > Decimal::ZERO => price,
            Some(price) => {
                return Some(RiskDecision::Reject(RiskRejection::hard(
                    RiskCheck::ExposureLimit,
                    format!("no valid mark price for {} (got {})", intent.instrument, price),
                )));
            }
            None => {
                return Some(RiskDecision::Reject(RiskRejection::hard(
                    RiskCheck::ExposureLimit,
                    format!("no price to value {}", intent.instrument),
                )));
            }
        };

        let current = ctx.effective_position();
        let added = ((current + side.signed(quantity)).abs() - current.abs()) * price;
        let projected = ctx.gross_exposure + added;
        if projected <= limits.max_aggregate_exposure {
            return None;
        }

        let room = (limits.max_aggregate_exposure - ctx.gross_exposure).max(Decimal::ZERO);
        let extra = (room / price).floor();
        // Crossing zero first unwinds the existing position
        let crossing = !current.is_zero() && Side::from_delta(current) != side;
        let allowed = if crossing {
            current.abs() * Decimal::TWO + extra
        } else {
            extra
        };
        let detail = format!(
            "gross exposure would reach {}, limit {}",
            projected, limits.max_aggregate_exposure
        );
        Some(Self::shrink(
            limits,
            side,
            allowed.min(quantity),
            RiskCheck::ExposureLimit,
            detail,
        ))
    }

    /// 3. Daily loss; a breach halts risk-increasing intents until the daily reset
    fn check_daily_loss(&self, ctx: &RiskContext, limits: &RiskLimits) -> Option<RiskRejection> {
        if let Some(Halt::DailyLoss(reason)) = self.halt.read().as_ref() {
            return Some(RiskRejection::hard(RiskCheck::DailyLossLimit, reason.clone()));
        }
        if ctx.daily_pnl > -limits.max_daily_loss {
            return None;
        }

        let reason = format!(
            "Daily loss limit breached: {} <= -{}",
            ctx.daily_pnl, limits.max_daily_loss
        );
        self.halt_for_daily_loss(reason.clone());
        Some(RiskRejection::hard(RiskCheck::DailyLossLimit, reason))
    }

    /// Rescale to `allowed` if the limits say so and anything is left
    fn shrink(
        limits: &RiskLimits,
        side: Side,
        allowed: Decimal,
        check: RiskCheck,
        detail: String,
    ) -> RiskDecision {
        if limits.on_breach == BreachAction::Rescale && allowed > Decimal::ZERO {
            RiskDecision::Rescale {
                side,
                quantity: allowed,
                reason: check,
            }
        } else {
            RiskDecision::Reject(RiskRejection::hard(check, detail))
        }
    }

    fn halt_for_daily_loss(&self, reason: String) {
        let mut halt = self.halt.write();
        if halt.is_none() {
            error!("[RISK] Trading halted: {}", reason);
            *halt = Some(Halt::DailyLoss(reason));
        }
    }

    /// Manual kill switch; risk-reducing intents still pass
    pub fn halt_trading(&self, reason: impl Into<String>) {
        let mut halt = self.halt.write();
        if halt.is_none() {
            let reason = reason.into();
            error!("[RISK] Trading halted: {}", reason);
            *halt = Some(Halt::Manual(reason));
        }
    }

    /// Resume trading (manual intervention)
    pub fn resume_trading(&self) {
        if self.halt.write().take().is_some() {
            info!("[RISK] Trading resumed");
        }
    }

    /// Start of a new trading day: clears rate windows and a daily-loss halt
    pub fn reset_daily(&self) {
        info!("[RISK] Daily reset");
        self.rate.reset();
        let mut halt = self.halt.write();
        if matches!(*halt, Some(Halt::DailyLoss(_))) {
            warn!("[RISK] Lifting daily loss halt");
            *halt = None;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt.read().is_some()
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halt.read().as_ref().map(|h| match h {
            Halt::Manual(r) | Halt::DailyLoss(r) => r.clone(),
        })
    }

    pub fn stats(&self) -> RiskStats {
        RiskStats {
            approved: self.approved.load(Ordering::Relaxed),
            rescaled: self.rescaled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retry_later: self.retry_later.load(Ordering::Relaxed),
        }
    }
}
