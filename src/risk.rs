// src/risk.rs
//
// Final gate between strategy signals and execution. Checks run in a
// fixed order so a halt always wins over the condition that caused it:
//
//   1. circuit breaker (warm switch or local latch)
//   2. feed latency
//   3. projected position vs the hard cap
//   4. daily loss vs the equity-fraction limit
//
// A tripped breaker is sticky for the trading day. It writes the warm
// switch so sibling processes halt too, and only `roll_day` clears it.

use std::collections::VecDeque;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::storage::TieredStorageCoordinator;
use crate::types::{FillNotice, Position, StrategySignal, TimestampMs};

/// Warm switch consulted (and written) by every instance.
pub const TRADING_SWITCH: &str = "trading_enabled";
/// Warm lock serializing position writes across instances.
pub const POSITION_LOCK: &str = "position";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    HaltedByCircuitBreaker,
    LatencyLimit { measured_ms: f64, limit_ms: f64 },
    PositionLimit { projected: f64, limit: f64 },
    DailyLossLimit { loss_ratio: f64, limit: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    LatencyLimit,
    DailyLossLimit,
    ExternalHalt,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripReason::LatencyLimit => "latency_limit",
            TripReason::DailyLossLimit => "daily_loss_limit",
            TripReason::ExternalHalt => "external_halt",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalDecision {
    Approved,
    Rejected(RejectReason),
}

impl SignalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, SignalDecision::Approved)
    }
}

/// Per-day risk accounting. Replaced wholesale at rollover.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub trading_date: NaiveDate,
    pub daily_realized_pnl: f64,
    pub daily_unrealized_pnl: f64,
    latency_samples: VecDeque<f64>,
    latency_sum: f64,
    pub halted: bool,
    pub trip_reason: Option<TripReason>,
}

impl RiskState {
    fn fresh(trading_date: NaiveDate) -> Self {
        Self {
            trading_date,
            daily_realized_pnl: 0.0,
            daily_unrealized_pnl: 0.0,
            latency_samples: VecDeque::new(),
            latency_sum: 0.0,
            halted: false,
            trip_reason: None,
        }
    }
}

pub struct RiskManager {
    state: RiskState,
}

impl RiskManager {
    pub fn new(trading_date: NaiveDate) -> Self {
        Self {
            state: RiskState::fresh(trading_date),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn halted(&self) -> bool {
        self.state.halted
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        self.state.trip_reason
    }

    pub fn record_latency(&mut self, sample_ms: f64, cfg: &RiskConfig) {
        if !sample_ms.is_finite() || sample_ms < 0.0 {
            return;
        }
        if self.state.latency_samples.len() == cfg.latency_window {
            if let Some(old) = self.state.latency_samples.pop_front() {
                self.state.latency_sum -= old;
            }
        }
        self.state.latency_samples.push_back(sample_ms);
        self.state.latency_sum += sample_ms;
    }

    pub fn mean_latency(&self) -> Option<f64> {
        if self.state.latency_samples.is_empty() {
            return None;
        }
        Some(self.state.latency_sum / self.state.latency_samples.len() as f64)
    }

    /// Mark-to-market PnL of the open position, refreshed each tick.
    pub fn mark_unrealized(&mut self, pnl: f64) {
        if pnl.is_finite() {
            self.state.daily_unrealized_pnl = pnl;
        }
    }

    pub fn daily_pnl(&self) -> f64 {
        self.state.daily_realized_pnl + self.state.daily_unrealized_pnl
    }

    /// Gate one signal. Checks run in documented order; the first
    /// failure wins.
    pub fn evaluate(
        &mut self,
        signal: &StrategySignal,
        storage: &mut TieredStorageCoordinator,
        cfg: &RiskConfig,
    ) -> SignalDecision {
        let switch_enabled = storage.get_switch(TRADING_SWITCH).unwrap_or(true);
        if !switch_enabled && !self.state.halted {
            // Another instance tripped the shared breaker.
            self.state.halted = true;
            self.state.trip_reason = Some(TripReason::ExternalHalt);
        }
        if self.state.halted || !switch_enabled {
            return SignalDecision::Rejected(RejectReason::HaltedByCircuitBreaker);
        }

        if let Some(measured_ms) = self.mean_latency() {
            if measured_ms > cfg.max_latency_ms {
                self.trip(TripReason::LatencyLimit, storage);
                return SignalDecision::Rejected(RejectReason::LatencyLimit {
                    measured_ms,
                    limit_ms: cfg.max_latency_ms,
                });
            }
        }

        // Re-read the position so a fill recorded since the last tick
        // cannot sneak the book over the cap. Reductions always pass.
        let current = storage
            .get_position()
            .map(|p| p.signed_size())
            .unwrap_or(0.0);
        let projected = current + signal.side.sign() * signal.size;
        if projected.abs() > cfg.max_position_size && projected.abs() > current.abs() {
            return SignalDecision::Rejected(RejectReason::PositionLimit {
                projected,
                limit: cfg.max_position_size,
            });
        }

        let loss_ratio = (-self.daily_pnl()).max(0.0) / cfg.starting_equity;
        if loss_ratio >= cfg.max_daily_loss {
            self.trip(TripReason::DailyLossLimit, storage);
            return SignalDecision::Rejected(RejectReason::DailyLossLimit {
                loss_ratio,
                limit: cfg.max_daily_loss,
            });
        }

        SignalDecision::Approved
    }

    /// Apply a fill: position under the shared warm lock, PnL into both
    /// the local ledger and the shared accumulator. A lock timeout
    /// degrades to a local write rather than stalling the pipeline.
    pub fn record_fill(
        &mut self,
        fill: &FillNotice,
        instrument: &str,
        storage: &mut TieredStorageCoordinator,
        cfg: &RiskConfig,
        now_ms: TimestampMs,
    ) {
        match storage.acquire_lock(POSITION_LOCK, cfg.lock_timeout_ms as i64, now_ms) {
            Ok(token) => {
                self.apply_fill_to_position(fill, instrument, storage, now_ms);
                let _ = storage.release_lock(POSITION_LOCK, token);
            }
            Err(err) => {
                eprintln!("POSITION_LOCK_MISS instrument={instrument} err={err:?} applying=local");
                self.apply_fill_to_position(fill, instrument, storage, now_ms);
            }
        }

        self.state.daily_realized_pnl += fill.pnl_delta;
        let shared = storage.incr_daily_pnl(fill.pnl_delta);
        // The shared accumulator sees sibling instances; whichever
        // ledger shows the deeper loss drives the breaker.
        let realized = self.state.daily_realized_pnl.min(shared);
        let loss_ratio = (-(realized + self.state.daily_unrealized_pnl)).max(0.0)
            / cfg.starting_equity;
        if loss_ratio >= cfg.max_daily_loss {
            self.trip(TripReason::DailyLossLimit, storage);
        }
    }

    /// Trip the breaker: latch locally, disable the shared switch. One
    /// shot per day.
    pub fn trip(&mut self, reason: TripReason, storage: &mut TieredStorageCoordinator) {
        if self.state.halted {
            return;
        }
        self.state.halted = true;
        self.state.trip_reason = Some(reason);
        storage.set_switch(TRADING_SWITCH, false);
        eprintln!(
            "CIRCUIT_BREAKER_TRIPPED reason={reason} date={} realized={:.2} unrealized={:.2}",
            self.state.trading_date, self.state.daily_realized_pnl, self.state.daily_unrealized_pnl
        );
    }

    /// Operator kill switch.
    pub fn halt(&mut self, storage: &mut TieredStorageCoordinator) {
        self.trip(TripReason::ExternalHalt, storage);
    }

    /// Explicit day-start reset. Clears the breaker, zeroes the ledgers,
    /// re-enables the shared switch. No-op unless the date advanced.
    pub fn roll_day(&mut self, today: NaiveDate, storage: &mut TieredStorageCoordinator) -> bool {
        if today <= self.state.trading_date {
            return false;
        }
        self.state = RiskState::fresh(today);
        storage.reset_daily_pnl();
        storage.set_switch(TRADING_SWITCH, true);
        eprintln!("RISK_DAY_ROLLED date={today}");
        true
    }

    fn apply_fill_to_position(
        &mut self,
        fill: &FillNotice,
        instrument: &str,
        storage: &mut TieredStorageCoordinator,
        now_ms: TimestampMs,
    ) {
        let mut position = storage
            .get_position()
            .unwrap_or_else(|| Position::flat(instrument, now_ms));
        position.apply_fill(fill.side, fill.price, fill.size, now_ms);
        storage.set_position(&position);
    }
}
