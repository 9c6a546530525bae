// src/strategy_core.rs
//
// Container for the three tactical machines. Each machine owns its own
// state and never sees the others'; this module only sequences them.
//
// Emission order is the arbitration priority: the risk gate consumes
// signals in the order produced here, so front-running outranks
// wall-riding, which outranks spread-capturing, whenever they fire on
// the same tick.

use crate::config::Config;
use crate::features::FeatureFrame;
use crate::front_run::{FrontRunPhase, FrontRunStrategy};
use crate::orderbook::BookSnapshot;
use crate::spread_capture::{SpreadCapturePhase, SpreadCaptureStrategy};
use crate::types::{ExecutionEvent, StrategyId, StrategySignal, TimestampMs, Trade};
use crate::wall_ride::{WallRidePhase, WallRideStrategy};

/// Arbitration order, highest priority first.
pub const STRATEGY_PRIORITY: [StrategyId; 3] = [
    StrategyId::FrontRun,
    StrategyId::WallRide,
    StrategyId::SpreadCapture,
];

#[derive(Debug, Default)]
pub struct StrategyEngine {
    front_run: FrontRunStrategy,
    wall_ride: WallRideStrategy,
    spread_capture: SpreadCaptureStrategy,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick every enabled machine against the fresh book view. A stale
    /// book freezes all of them: no transitions, no signals, until a
    /// snapshot restores trust.
    pub fn on_tick(
        &mut self,
        snap: &BookSnapshot,
        frame: &FeatureFrame,
        trade: Option<&Trade>,
        cfg: &Config,
        now_ms: TimestampMs,
    ) -> Vec<StrategySignal> {
        if snap.status.is_stale() {
            return Vec::new();
        }
        let mut signals = Vec::new();
        if cfg.front_run.enabled {
            signals.extend(self.front_run.on_tick(snap, frame, trade, &cfg.front_run, now_ms));
        }
        if cfg.wall_ride.enabled {
            signals.extend(self.wall_ride.on_tick(snap, frame, &cfg.wall_ride, now_ms));
        }
        if cfg.spread_capture.enabled {
            signals.extend(self.spread_capture.on_tick(snap, frame, &cfg.spread_capture, now_ms));
        }
        signals
    }

    /// Route an execution event to the machine that owns the order.
    pub fn on_execution(&mut self, event: &ExecutionEvent) {
        match event.strategy() {
            StrategyId::FrontRun => self.front_run.on_execution(event),
            StrategyId::WallRide => self.wall_ride.on_execution(event),
            StrategyId::SpreadCapture => {}
        }
    }

    /// Drop every machine back to Idle. Used when the breaker trips so
    /// half-open sequences cannot resume against a dead pipeline.
    pub fn force_idle_all(&mut self) {
        self.front_run.reset();
        self.wall_ride.reset();
        self.spread_capture.reset();
    }

    pub fn phases(&self) -> (FrontRunPhase, WallRidePhase, SpreadCapturePhase) {
        (
            self.front_run.phase(),
            self.wall_ride.phase(),
            self.spread_capture.phase(),
        )
    }
}
