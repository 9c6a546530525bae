// src/engine.rs
//
// The decision pipeline, one feed message at a time:
//
//   message -> book mirror -> features -> strategy machines -> risk
//   gate -> storage tiers
//
// `Engine` is stateless glue over the config; everything mutable lives
// in `PipelineState` so a run is a pure fold over the message stream.

use crate::config::Config;
use crate::features::{FeatureEngine, FeatureFrame};
use crate::orderbook::{BookStatus, OrderBookEngine};
use crate::risk::{RejectReason, RiskManager, SignalDecision};
use crate::storage::TieredStorageCoordinator;
use crate::strategy_core::StrategyEngine;
use crate::types::{utc_date, ExecutionEvent, FeedMessage, StrategySignal, TimestampMs};
use crate::warm_store::WarmStore;

pub struct PipelineState {
    pub book: OrderBookEngine,
    pub features: FeatureEngine,
    pub strategies: StrategyEngine,
    pub risk: RiskManager,
    pub storage: TieredStorageCoordinator,
    tick: u64,
    resync_requested: bool,
    halt_handled: bool,
}

/// What one message did to the pipeline.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: u64,
    pub book_status: BookStatus,
    pub frame: FeatureFrame,
    pub emitted: Vec<StrategySignal>,
    pub approved: Vec<StrategySignal>,
    pub rejected: Vec<(StrategySignal, RejectReason)>,
    /// The book is stale and needs a full snapshot from the feed.
    pub resync_requested: bool,
    pub flushed: bool,
}

pub struct Engine<'a> {
    cfg: &'a Config,
}

impl<'a> Engine<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn init_state(&self, warm: Box<dyn WarmStore>, start_ms: TimestampMs) -> PipelineState {
        PipelineState {
            book: OrderBookEngine::new(self.cfg.instrument.clone()),
            features: FeatureEngine::new(),
            strategies: StrategyEngine::new(),
            risk: RiskManager::new(utc_date(start_ms)),
            storage: TieredStorageCoordinator::new(self.cfg, warm),
            tick: 0,
            resync_requested: false,
            halt_handled: false,
        }
    }

    /// Fold one message through the pipeline. `now_ms` is the receive
    /// clock; its gap to the message timestamp is the latency sample.
    pub fn process_message(
        &self,
        state: &mut PipelineState,
        msg: &FeedMessage,
        now_ms: TimestampMs,
    ) -> TickOutcome {
        let cfg = self.cfg;
        state.tick += 1;

        let latency_ms = (now_ms - msg.timestamp_ms()).max(0) as f64;
        state.risk.record_latency(latency_ms, &cfg.risk);

        let mut tick_trade = None;
        match msg {
            FeedMessage::Delta {
                seq,
                deltas,
                checksum,
                timestamp_ms,
            } => {
                match state.book.apply_delta(deltas, *seq, *timestamp_ms, &cfg.book) {
                    Ok(stats) => {
                        state
                            .features
                            .on_book_delta(&stats, *timestamp_ms, &cfg.features);
                        if let Some(expected) = checksum {
                            // Mismatch latches staleness inside the book.
                            let _ = state.book.verify_checksum(*expected, &cfg.book);
                        }
                    }
                    Err(_) => {
                        // Book already latched stale where that applies;
                        // keep serving annotated state until resync.
                    }
                }
            }
            FeedMessage::Snapshot {
                seq,
                bids,
                asks,
                timestamp_ms,
            } => {
                if state
                    .book
                    .apply_snapshot(bids, asks, *seq, *timestamp_ms, &cfg.book)
                    .is_ok()
                {
                    state.resync_requested = false;
                }
            }
            FeedMessage::Trade(trade) => {
                state.storage.record_trade(trade, cfg);
                state.features.on_trade(trade, &cfg.features);
                tick_trade = Some(trade);
            }
        }

        if state.book.is_stale() {
            state.resync_requested = true;
        }

        let frame = state.features.observe_book(&state.book, &cfg.features, now_ms);

        self.refresh_unrealized(state);

        // One-shot halt handling: park every machine and stop emitting
        // until the day rolls.
        if state.risk.halted() {
            if !state.halt_handled {
                state.strategies.force_idle_all();
                state.halt_handled = true;
            }
        } else {
            state.halt_handled = false;
        }

        let emitted = if state.risk.halted() {
            Vec::new()
        } else {
            let snap = state.book.snapshot(cfg.book.view_depth);
            state
                .strategies
                .on_tick(&snap, &frame, tick_trade, cfg, now_ms)
        };

        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for signal in &emitted {
            match state.risk.evaluate(signal, &mut state.storage, &cfg.risk) {
                SignalDecision::Approved => approved.push(signal.clone()),
                SignalDecision::Rejected(reason) => rejected.push((signal.clone(), reason)),
            }
        }

        let flushed = state.storage.maybe_flush(&state.book, now_ms, cfg);

        TickOutcome {
            tick: state.tick,
            book_status: state.book.status(),
            frame,
            emitted,
            approved,
            rejected,
            resync_requested: state.resync_requested,
            flushed,
        }
    }

    /// Fills and order lifecycle notices from the execution side.
    pub fn on_execution_event(
        &self,
        state: &mut PipelineState,
        event: &ExecutionEvent,
        now_ms: TimestampMs,
    ) {
        if let ExecutionEvent::Fill(fill) = event {
            state.risk.record_fill(
                fill,
                &self.cfg.instrument,
                &mut state.storage,
                &self.cfg.risk,
                now_ms,
            );
        }
        state.strategies.on_execution(event);
    }

    /// Explicit day-start reset, driven by the process controller.
    pub fn roll_day(&self, state: &mut PipelineState, now_ms: TimestampMs) -> bool {
        state.risk.roll_day(utc_date(now_ms), &mut state.storage)
    }

    /// End-of-session archive flush.
    pub fn shutdown(&self, state: &mut PipelineState, now_ms: TimestampMs) {
        state
            .storage
            .final_flush(&state.book, now_ms, self.cfg);
    }

    fn refresh_unrealized(&self, state: &mut PipelineState) {
        let Some(mid) = state.book.mid_price() else {
            return;
        };
        let pnl = state
            .storage
            .get_position()
            .map(|p| (mid - p.avg_price) * p.signed_size())
            .unwrap_or(0.0);
        state.risk.mark_unrealized(pnl);
    }
}
