// src/front_run.rs
//
// Vacuum-chasing machine: Idle -> Armed -> Entered -> Exiting -> Idle.
//
// A one-sided depth collapse plus an agreeing OFI trend arms the
// machine in the direction the book is about to move. A confirming
// aggressive trade triggers entry; the position exits on a profit
// target or a hold timeout, and the machine idles once the exit is
// acknowledged. At most one transition, and so at most one signal, per
// tick.

use crate::config::FrontRunConfig;
use crate::features::{FeatureFrame, TrendDirection};
use crate::orderbook::BookSnapshot;
use crate::types::{
    BookSide, ExecutionEvent, Side, StrategyId, StrategySignal, TimestampMs, Trade,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrontRunPhase {
    Idle,
    Armed {
        side: Side,
        magnitude: f64,
        armed_ms: TimestampMs,
    },
    Entered {
        side: Side,
        entry_mid: f64,
        entered_ms: TimestampMs,
    },
    Exiting {
        side: Side,
    },
}

#[derive(Debug)]
pub struct FrontRunStrategy {
    phase: FrontRunPhase,
}

impl FrontRunStrategy {
    pub fn new() -> Self {
        Self {
            phase: FrontRunPhase::Idle,
        }
    }

    pub fn phase(&self) -> FrontRunPhase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = FrontRunPhase::Idle;
    }

    pub fn on_tick(
        &mut self,
        snap: &BookSnapshot,
        frame: &FeatureFrame,
        trade: Option<&Trade>,
        cfg: &FrontRunConfig,
        now_ms: TimestampMs,
    ) -> Option<StrategySignal> {
        match self.phase {
            FrontRunPhase::Idle => {
                let Some(vacuum) = frame.vacuum else {
                    return None;
                };
                if vacuum.magnitude < cfg.min_vacuum_magnitude {
                    return None;
                }
                // The side that lost its depth is the side about to be
                // swept; trade with the sweep, not against it.
                let side = match vacuum.side {
                    BookSide::Bid => Side::Sell,
                    BookSide::Ask => Side::Buy,
                };
                let trend_agrees = matches!(
                    (side, frame.ofi_trend),
                    (Side::Sell, TrendDirection::Falling) | (Side::Buy, TrendDirection::Rising)
                );
                if trend_agrees {
                    self.phase = FrontRunPhase::Armed {
                        side,
                        magnitude: vacuum.magnitude,
                        armed_ms: now_ms,
                    };
                }
                None
            }
            FrontRunPhase::Armed {
                side,
                magnitude,
                armed_ms,
            } => {
                if now_ms - armed_ms > cfg.confirm_timeout_ms {
                    self.phase = FrontRunPhase::Idle;
                    return None;
                }
                let confirmed = trade
                    .is_some_and(|t| t.side == side && t.size >= cfg.confirm_min_size);
                if !confirmed {
                    return None;
                }
                let entry_mid = frame.mid?;
                self.phase = FrontRunPhase::Entered {
                    side,
                    entry_mid,
                    entered_ms: now_ms,
                };
                Some(StrategySignal {
                    strategy: StrategyId::FrontRun,
                    instrument: snap.instrument.clone(),
                    side,
                    price: None,
                    size: cfg.entry_size,
                    confidence: magnitude.min(1.0),
                    reason: "vacuum_confirmed".to_string(),
                    timestamp_ms: now_ms,
                })
            }
            FrontRunPhase::Entered {
                side,
                entry_mid,
                entered_ms,
            } => {
                let mid = frame.mid.unwrap_or(entry_mid);
                let favorable_move = match side {
                    Side::Buy => mid - entry_mid,
                    Side::Sell => entry_mid - mid,
                };
                let target_hit = favorable_move >= entry_mid * cfg.profit_target_frac;
                let timed_out = now_ms - entered_ms >= cfg.max_hold_ms;
                if !target_hit && !timed_out {
                    return None;
                }
                let exit_side = side.flip();
                self.phase = FrontRunPhase::Exiting { side: exit_side };
                Some(StrategySignal {
                    strategy: StrategyId::FrontRun,
                    instrument: snap.instrument.clone(),
                    side: exit_side,
                    price: None,
                    size: cfg.entry_size,
                    confidence: 1.0,
                    reason: if target_hit {
                        "profit_target".to_string()
                    } else {
                        "max_hold".to_string()
                    },
                    timestamp_ms: now_ms,
                })
            }
            FrontRunPhase::Exiting { .. } => None,
        }
    }

    /// Exit completion is confirmed by execution, not by the tape.
    pub fn on_execution(&mut self, event: &ExecutionEvent) {
        if event.strategy() != StrategyId::FrontRun {
            return;
        }
        if let FrontRunPhase::Exiting { .. } = self.phase {
            match event {
                ExecutionEvent::Fill(_) | ExecutionEvent::Ack { .. } => {
                    self.phase = FrontRunPhase::Idle;
                }
                ExecutionEvent::CancelConfirm { .. } => {}
            }
        }
    }
}

impl Default for FrontRunStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::VacuumEvent;
    use crate::orderbook::BookStatus;
    use crate::types::{FillNotice, PriceLevel};
    use std::sync::Arc;

    fn snap() -> BookSnapshot {
        let level = |price: f64| PriceLevel {
            price,
            size: 10.0,
            order_count: 1,
            last_update_ms: 0,
        };
        BookSnapshot {
            instrument: Arc::from("TEST-SWAP"),
            seq: 1,
            timestamp_ms: 0,
            status: BookStatus::Live,
            bids: vec![level(100.0)],
            asks: vec![level(101.0)],
        }
    }

    fn frame(mid: f64) -> FeatureFrame {
        FeatureFrame {
            mid: Some(mid),
            spread: Some(1.0),
            avg_spread: Some(1.0),
            spread_band: None,
            ofi: 0.0,
            ofi_trend: TrendDirection::Stable,
            weighted_mid: Some(mid),
            pressure: 1.0,
            bid_depth: 10.0,
            ask_depth: 10.0,
            avg_level_size: Some(10.0),
            vacuum: None,
        }
    }

    fn vacuum_frame(mid: f64, side: BookSide, trend: TrendDirection) -> FeatureFrame {
        let mut f = frame(mid);
        f.vacuum = Some(VacuumEvent {
            side,
            magnitude: 0.6,
            timestamp_ms: 0,
        });
        f.ofi_trend = trend;
        f
    }

    fn confirming_trade(side: Side, size: f64, ts: TimestampMs) -> Trade {
        Trade {
            trade_id: 1,
            price: 100.5,
            size,
            side,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn full_cycle_arm_enter_exit_idle() {
        let cfg = FrontRunConfig::default();
        let mut strat = FrontRunStrategy::new();
        let snap = snap();

        // Bid-side vacuum with falling flow arms a short.
        let armed = strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Bid, TrendDirection::Falling),
            None,
            &cfg,
            0,
        );
        assert!(armed.is_none(), "arming emits nothing");
        assert!(matches!(
            strat.phase(),
            FrontRunPhase::Armed {
                side: Side::Sell,
                ..
            }
        ));

        // A large aggressive sell confirms; entry goes out.
        let trade = confirming_trade(Side::Sell, cfg.confirm_min_size, 100);
        let entry = strat
            .on_tick(&snap, &frame(100.5), Some(&trade), &cfg, 100)
            .expect("entry emitted");
        assert_eq!(entry.side, Side::Sell);
        assert_eq!(entry.size, cfg.entry_size);
        assert_eq!(entry.reason, "vacuum_confirmed");
        assert!(matches!(strat.phase(), FrontRunPhase::Entered { .. }));

        // Mid drops past the profit target; exit flips the side.
        let target_mid = 100.5 * (1.0 - cfg.profit_target_frac) - 0.01;
        let exit = strat
            .on_tick(&snap, &frame(target_mid), None, &cfg, 200)
            .expect("exit emitted");
        assert_eq!(exit.side, Side::Buy);
        assert_eq!(exit.reason, "profit_target");
        assert!(matches!(strat.phase(), FrontRunPhase::Exiting { .. }));

        // Waiting for the fill emits nothing further.
        assert!(strat.on_tick(&snap, &frame(target_mid), None, &cfg, 300).is_none());

        strat.on_execution(&ExecutionEvent::Fill(FillNotice {
            strategy: StrategyId::FrontRun,
            side: Side::Buy,
            price: target_mid,
            size: cfg.entry_size,
            pnl_delta: 0.1,
            timestamp_ms: 400,
        }));
        assert_eq!(strat.phase(), FrontRunPhase::Idle);
    }

    #[test]
    fn confirmation_timeout_disarms() {
        let cfg = FrontRunConfig::default();
        let mut strat = FrontRunStrategy::new();
        let snap = snap();
        strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Ask, TrendDirection::Rising),
            None,
            &cfg,
            0,
        );
        assert!(matches!(
            strat.phase(),
            FrontRunPhase::Armed { side: Side::Buy, .. }
        ));

        let late = cfg.confirm_timeout_ms + 1;
        assert!(strat.on_tick(&snap, &frame(100.5), None, &cfg, late).is_none());
        assert_eq!(strat.phase(), FrontRunPhase::Idle);
    }

    #[test]
    fn disagreeing_trend_keeps_idle() {
        let cfg = FrontRunConfig::default();
        let mut strat = FrontRunStrategy::new();
        let snap = snap();
        strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Bid, TrendDirection::Rising),
            None,
            &cfg,
            0,
        );
        assert_eq!(strat.phase(), FrontRunPhase::Idle);
    }

    #[test]
    fn weak_vacuum_is_ignored() {
        let mut cfg = FrontRunConfig::default();
        cfg.min_vacuum_magnitude = 0.8;
        let mut strat = FrontRunStrategy::new();
        let snap = snap();
        strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Bid, TrendDirection::Falling),
            None,
            &cfg,
            0,
        );
        assert_eq!(strat.phase(), FrontRunPhase::Idle, "0.6 below the 0.8 bar");
    }

    #[test]
    fn small_or_wrong_side_trades_do_not_confirm() {
        let cfg = FrontRunConfig::default();
        let mut strat = FrontRunStrategy::new();
        let snap = snap();
        strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Bid, TrendDirection::Falling),
            None,
            &cfg,
            0,
        );

        let small = confirming_trade(Side::Sell, cfg.confirm_min_size / 2.0, 10);
        assert!(strat.on_tick(&snap, &frame(100.5), Some(&small), &cfg, 10).is_none());
        assert!(matches!(strat.phase(), FrontRunPhase::Armed { .. }));

        let wrong_side = confirming_trade(Side::Buy, cfg.confirm_min_size * 2.0, 20);
        assert!(strat
            .on_tick(&snap, &frame(100.5), Some(&wrong_side), &cfg, 20)
            .is_none());
        assert!(matches!(strat.phase(), FrontRunPhase::Armed { .. }));
    }

    #[test]
    fn hold_timeout_forces_the_exit() {
        let cfg = FrontRunConfig::default();
        let mut strat = FrontRunStrategy::new();
        let snap = snap();
        strat.on_tick(
            &snap,
            &vacuum_frame(100.5, BookSide::Bid, TrendDirection::Falling),
            None,
            &cfg,
            0,
        );
        let trade = confirming_trade(Side::Sell, cfg.confirm_min_size, 10);
        strat.on_tick(&snap, &frame(100.5), Some(&trade), &cfg, 10);

        // Price never moves; the hold timer pushes the exit out.
        let exit = strat
            .on_tick(&snap, &frame(100.5), None, &cfg, 10 + cfg.max_hold_ms)
            .expect("timeout exit");
        assert_eq!(exit.reason, "max_hold");
        assert_eq!(exit.side, Side::Buy);
    }
}
