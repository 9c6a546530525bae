// src/spread_capture.rs
//
// Spread-capture machine: Idle -> SpreadWide -> PositionOpen -> Closed
// -> Idle.
//
// When the spread blows out past a multiple of its rolling average and
// stays there for a confirming tick, the machine posts both sides of
// the touch. The two legs of a quote go out together as one action,
// buy leg first. The position closes when the spread normalizes or the
// hold timer expires.

use crate::config::SpreadCaptureConfig;
use crate::features::FeatureFrame;
use crate::orderbook::BookSnapshot;
use crate::types::{Side, StrategyId, StrategySignal, TimestampMs};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpreadCapturePhase {
    Idle,
    SpreadWide {
        detected_ms: TimestampMs,
    },
    PositionOpen {
        opened_ms: TimestampMs,
        bid_px: f64,
        ask_px: f64,
    },
    Closed {
        closed_ms: TimestampMs,
    },
}

#[derive(Debug)]
pub struct SpreadCaptureStrategy {
    phase: SpreadCapturePhase,
}

impl SpreadCaptureStrategy {
    pub fn new() -> Self {
        Self {
            phase: SpreadCapturePhase::Idle,
        }
    }

    pub fn phase(&self) -> SpreadCapturePhase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = SpreadCapturePhase::Idle;
    }

    pub fn on_tick(
        &mut self,
        snap: &BookSnapshot,
        frame: &FeatureFrame,
        cfg: &SpreadCaptureConfig,
        now_ms: TimestampMs,
    ) -> Vec<StrategySignal> {
        match self.phase {
            SpreadCapturePhase::Idle => {
                if is_wide(frame, cfg) {
                    self.phase = SpreadCapturePhase::SpreadWide {
                        detected_ms: now_ms,
                    };
                }
                Vec::new()
            }
            SpreadCapturePhase::SpreadWide { .. } => {
                if !is_wide(frame, cfg) {
                    self.phase = SpreadCapturePhase::Idle;
                    return Vec::new();
                }
                let (Some(bid), Some(ask)) = (snap.best_bid(), snap.best_ask()) else {
                    self.phase = SpreadCapturePhase::Idle;
                    return Vec::new();
                };
                self.phase = SpreadCapturePhase::PositionOpen {
                    opened_ms: now_ms,
                    bid_px: bid.price,
                    ask_px: ask.price,
                };
                let confidence = entry_confidence(frame, cfg);
                vec![
                    quote_leg(snap, Side::Buy, Some(bid.price), confidence, "spread_wide", cfg, now_ms),
                    quote_leg(snap, Side::Sell, Some(ask.price), confidence, "spread_wide", cfg, now_ms),
                ]
            }
            SpreadCapturePhase::PositionOpen { opened_ms, .. } => {
                let normalized = match (frame.spread, frame.avg_spread) {
                    (Some(spread), Some(avg)) => spread <= avg,
                    _ => false,
                };
                let timed_out = now_ms - opened_ms >= cfg.max_hold_ms;
                if !normalized && !timed_out {
                    return Vec::new();
                }
                self.phase = SpreadCapturePhase::Closed { closed_ms: now_ms };
                let reason = if normalized {
                    "spread_normalized"
                } else {
                    "capture_timeout"
                };
                // Close both legs by crossing; no resting price.
                vec![
                    quote_leg(snap, Side::Buy, None, 1.0, reason, cfg, now_ms),
                    quote_leg(snap, Side::Sell, None, 1.0, reason, cfg, now_ms),
                ]
            }
            SpreadCapturePhase::Closed { .. } => {
                self.phase = SpreadCapturePhase::Idle;
                Vec::new()
            }
        }
    }
}

impl Default for SpreadCaptureStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn is_wide(frame: &FeatureFrame, cfg: &SpreadCaptureConfig) -> bool {
    match (frame.spread, frame.avg_spread) {
        (Some(spread), Some(avg)) => avg > 0.0 && spread > cfg.widen_multiple * avg,
        _ => false,
    }
}

fn entry_confidence(frame: &FeatureFrame, cfg: &SpreadCaptureConfig) -> f64 {
    match (frame.spread, frame.avg_spread) {
        (Some(spread), Some(avg)) if avg > 0.0 => {
            (spread / (cfg.widen_multiple * avg) / 2.0).min(1.0)
        }
        _ => 0.0,
    }
}

fn quote_leg(
    snap: &BookSnapshot,
    side: Side,
    price: Option<f64>,
    confidence: f64,
    reason: &str,
    cfg: &SpreadCaptureConfig,
    now_ms: TimestampMs,
) -> StrategySignal {
    StrategySignal {
        strategy: StrategyId::SpreadCapture,
        instrument: snap.instrument.clone(),
        side,
        price,
        size: cfg.capture_size,
        confidence,
        reason: reason.to_string(),
        timestamp_ms: now_ms,
    }
}
