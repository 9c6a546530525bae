// src/wall_ride.rs
//
// Wall-riding machine: Idle -> WatchingWall -> Queued -> Filled -> Idle.
//
// A wall is a resting level far larger than the book's average. Once it
// has persisted long enough it is treated as real support/resistance
// and the machine queues just in front of it. A wall that disappears
// abandons the ride.

use crate::config::WallRideConfig;
use crate::features::FeatureFrame;
use crate::orderbook::BookSnapshot;
use crate::types::{
    BookSide, ExecutionEvent, PriceLevel, Side, StrategyId, StrategySignal, TimestampMs,
};

const PRICE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WallRidePhase {
    Idle,
    WatchingWall {
        side: BookSide,
        price: f64,
        first_seen_ms: TimestampMs,
        last_seen_ms: TimestampMs,
    },
    Queued {
        side: BookSide,
        wall_price: f64,
        queued_ms: TimestampMs,
        last_seen_ms: TimestampMs,
    },
    Filled {
        filled_ms: TimestampMs,
    },
}

#[derive(Debug, Clone, Copy)]
struct Wall {
    side: BookSide,
    price: f64,
    size: f64,
}

#[derive(Debug)]
pub struct WallRideStrategy {
    phase: WallRidePhase,
}

impl WallRideStrategy {
    pub fn new() -> Self {
        Self {
            phase: WallRidePhase::Idle,
        }
    }

    pub fn phase(&self) -> WallRidePhase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = WallRidePhase::Idle;
    }

    pub fn on_tick(
        &mut self,
        snap: &BookSnapshot,
        frame: &FeatureFrame,
        cfg: &WallRideConfig,
        now_ms: TimestampMs,
    ) -> Option<StrategySignal> {
        let Some(avg) = frame.avg_level_size else {
            return None;
        };
        match self.phase {
            WallRidePhase::Idle => {
                if let Some(wall) = find_wall(snap, avg, cfg) {
                    self.phase = WallRidePhase::WatchingWall {
                        side: wall.side,
                        price: wall.price,
                        first_seen_ms: now_ms,
                        last_seen_ms: now_ms,
                    };
                }
                None
            }
            WallRidePhase::WatchingWall {
                side,
                price,
                first_seen_ms,
                last_seen_ms,
            } => {
                match wall_at(snap, side, price, avg, cfg) {
                    Some(wall) => {
                        if now_ms - first_seen_ms >= cfg.persist_ms {
                            let (order_side, ride_price) = ride_quote(side, price, cfg);
                            self.phase = WallRidePhase::Queued {
                                side,
                                wall_price: price,
                                queued_ms: now_ms,
                                last_seen_ms: now_ms,
                            };
                            return Some(StrategySignal {
                                strategy: StrategyId::WallRide,
                                instrument: snap.instrument.clone(),
                                side: order_side,
                                price: Some(ride_price),
                                size: cfg.ride_size,
                                confidence: wall_confidence(wall.size, avg, cfg),
                                reason: "wall_persisted".to_string(),
                                timestamp_ms: now_ms,
                            });
                        }
                        self.phase = WallRidePhase::WatchingWall {
                            side,
                            price,
                            first_seen_ms,
                            last_seen_ms: now_ms,
                        };
                        None
                    }
                    None => {
                        if now_ms - last_seen_ms >= cfg.gone_ms {
                            self.phase = WallRidePhase::Idle;
                        }
                        None
                    }
                }
            }
            WallRidePhase::Queued {
                side,
                wall_price,
                queued_ms,
                last_seen_ms,
            } => {
                match wall_at(snap, side, wall_price, avg, cfg) {
                    Some(_) => {
                        self.phase = WallRidePhase::Queued {
                            side,
                            wall_price,
                            queued_ms,
                            last_seen_ms: now_ms,
                        };
                    }
                    None => {
                        // The wall pulled; riding without it is toxic.
                        if now_ms - last_seen_ms >= cfg.gone_ms {
                            self.phase = WallRidePhase::Idle;
                        }
                    }
                }
                None
            }
            WallRidePhase::Filled { .. } => {
                self.phase = WallRidePhase::Idle;
                None
            }
        }
    }

    pub fn on_execution(&mut self, event: &ExecutionEvent) {
        if event.strategy() != StrategyId::WallRide {
            return;
        }
        if let WallRidePhase::Queued { .. } = self.phase {
            match event {
                ExecutionEvent::Fill(fill) => {
                    self.phase = WallRidePhase::Filled {
                        filled_ms: fill.timestamp_ms,
                    };
                }
                ExecutionEvent::CancelConfirm { .. } => {
                    self.phase = WallRidePhase::Idle;
                }
                ExecutionEvent::Ack { .. } => {}
            }
        }
    }
}

impl Default for WallRideStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn qualifies(level: &PriceLevel, avg: f64, cfg: &WallRideConfig) -> bool {
    level.size >= cfg.min_wall_size && level.size > cfg.wall_multiple * avg
}

/// Closest qualifying wall per side; the bigger one wins a tie.
fn find_wall(snap: &BookSnapshot, avg: f64, cfg: &WallRideConfig) -> Option<Wall> {
    let bid = snap
        .bids
        .iter()
        .find(|l| qualifies(l, avg, cfg))
        .map(|l| Wall {
            side: BookSide::Bid,
            price: l.price,
            size: l.size,
        });
    let ask = snap
        .asks
        .iter()
        .find(|l| qualifies(l, avg, cfg))
        .map(|l| Wall {
            side: BookSide::Ask,
            price: l.price,
            size: l.size,
        });
    match (bid, ask) {
        (Some(b), Some(a)) => Some(if b.size >= a.size { b } else { a }),
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Re-locate a tracked wall: same side, same price, still wall-sized.
fn wall_at(
    snap: &BookSnapshot,
    side: BookSide,
    price: f64,
    avg: f64,
    cfg: &WallRideConfig,
) -> Option<Wall> {
    let levels = match side {
        BookSide::Bid => &snap.bids,
        BookSide::Ask => &snap.asks,
    };
    levels
        .iter()
        .find(|l| (l.price - price).abs() < PRICE_EPS && qualifies(l, avg, cfg))
        .map(|l| Wall {
            side,
            price: l.price,
            size: l.size,
        })
}

/// Queue one improvement step in front of the wall, on the wall's side
/// of the market.
fn ride_quote(side: BookSide, wall_price: f64, cfg: &WallRideConfig) -> (Side, f64) {
    match side {
        BookSide::Bid => (Side::Buy, wall_price * (1.0 + cfg.price_improvement)),
        BookSide::Ask => (Side::Sell, wall_price * (1.0 - cfg.price_improvement)),
    }
}

fn wall_confidence(size: f64, avg: f64, cfg: &WallRideConfig) -> f64 {
    if avg <= 0.0 {
        return 0.0;
    }
    // 0.5 at the qualifying threshold, 1.0 at twice the threshold.
    (size / (cfg.wall_multiple * avg) / 2.0).min(1.0)
}
