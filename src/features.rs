// src/features.rs
//
// Microstructure features over the live book and the trade tape.
//
// Everything here is bounded and O(1) amortized per update: OFI samples
// carry a running cumulative sum so window sums are two lookups, vacuum
// detection keeps a monotonic max deque, pressure is an EWMA.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::orderbook::{DeltaStats, OrderBookEngine};
use crate::types::{BookSide, Side, TimestampMs, Trade};

/// One order-flow imbalance observation. `cum` is the running total up
/// to and including this sample, so any trailing-window sum is a
/// difference of two `cum` values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfiSample {
    pub delta: f64,
    pub cum: f64,
    pub timestamp_ms: TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadBand {
    Normal,
    Wide,
    Extreme,
}

/// A sudden one-sided depth collapse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VacuumEvent {
    pub side: BookSide,
    pub magnitude: f64,
    pub timestamp_ms: TimestampMs,
}

/// Sliding-window depth tracker for one side. The max deque is
/// monotonic decreasing, so the window maximum is always the front.
/// `armed` makes each distinct collapse fire exactly once.
#[derive(Debug, Clone, Default)]
struct VacuumTracker {
    maxq: VecDeque<(TimestampMs, f64)>,
    last_depth: f64,
    armed: bool,
}

impl VacuumTracker {
    fn new() -> Self {
        Self {
            maxq: VecDeque::new(),
            last_depth: 0.0,
            armed: true,
        }
    }

    fn record(&mut self, now_ms: TimestampMs, depth: f64, interval_ms: i64) {
        let cutoff = now_ms - interval_ms;
        while self.maxq.front().is_some_and(|(ts, _)| *ts < cutoff) {
            self.maxq.pop_front();
        }
        while self.maxq.back().is_some_and(|(_, d)| *d <= depth) {
            self.maxq.pop_back();
        }
        self.maxq.push_back((now_ms, depth));
        self.last_depth = depth;
    }

    fn detect(&mut self, side: BookSide, threshold: f64, now_ms: TimestampMs) -> Option<VacuumEvent> {
        let max = self.maxq.front().map(|(_, d)| *d)?;
        if max <= 0.0 {
            return None;
        }
        let drop_frac = (max - self.last_depth) / max;
        if self.armed && drop_frac > threshold {
            self.armed = false;
            return Some(VacuumEvent {
                side,
                magnitude: drop_frac,
                timestamp_ms: now_ms,
            });
        }
        if !self.armed && drop_frac <= threshold / 2.0 {
            self.armed = true;
        }
        None
    }
}

/// Per-tick feature view handed to the strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub mid: Option<f64>,
    pub spread: Option<f64>,
    pub avg_spread: Option<f64>,
    pub spread_band: Option<SpreadBand>,
    pub ofi: f64,
    pub ofi_trend: TrendDirection,
    pub weighted_mid: Option<f64>,
    pub pressure: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub avg_level_size: Option<f64>,
    pub vacuum: Option<VacuumEvent>,
}

#[derive(Debug, Clone)]
pub struct FeatureEngine {
    ofi_history: VecDeque<OfiSample>,
    ofi_total: f64,
    bid_vacuum: VacuumTracker,
    ask_vacuum: VacuumTracker,
    pressure: Option<f64>,
    spread_history: VecDeque<f64>,
    spread_sum: f64,
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self {
            ofi_history: VecDeque::new(),
            ofi_total: 0.0,
            bid_vacuum: VacuumTracker::new(),
            ask_vacuum: VacuumTracker::new(),
            pressure: None,
            spread_history: VecDeque::new(),
            spread_sum: 0.0,
        }
    }

    /// Trades are directional flow: buys add, sells subtract.
    pub fn on_trade(&mut self, trade: &Trade, cfg: &FeatureConfig) {
        let delta = match trade.side {
            Side::Buy => trade.size,
            Side::Sell => -trade.size,
        };
        self.push_ofi(delta, trade.timestamp_ms, cfg);
    }

    /// Book changes are passive flow: size added on the bid side adds,
    /// size added on the ask side subtracts. A batch with no net change
    /// records nothing.
    pub fn on_book_delta(&mut self, stats: &DeltaStats, now_ms: TimestampMs, cfg: &FeatureConfig) {
        let delta = stats.bid_volume - stats.ask_volume;
        if delta != 0.0 {
            self.push_ofi(delta, now_ms, cfg);
        }
    }

    /// Sum of the last `window` OFI samples.
    pub fn ofi(&self, window: usize) -> f64 {
        let len = self.ofi_history.len();
        if len == 0 || window == 0 {
            return 0.0;
        }
        let last = self.ofi_history[len - 1].cum;
        let base = if window >= len {
            let first = &self.ofi_history[0];
            first.cum - first.delta
        } else {
            self.ofi_history[len - 1 - window].cum
        };
        last - base
    }

    /// Least-squares slope over the most recent OFI samples, bucketed
    /// into rising/falling/stable by the configured threshold.
    pub fn ofi_trend(&self, cfg: &FeatureConfig) -> TrendDirection {
        let len = self.ofi_history.len();
        let take = cfg.trend_window.min(len);
        if take < 2 {
            return TrendDirection::Stable;
        }
        let start = len - take;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;
        for (i, sample) in self.ofi_history.iter().skip(start).enumerate() {
            let x = i as f64;
            sum_x += x;
            sum_y += sample.delta;
            sum_xy += x * sample.delta;
            sum_xx += x * x;
        }
        let n = take as f64;
        let denom = n * sum_xx - sum_x * sum_x;
        if denom == 0.0 {
            return TrendDirection::Stable;
        }
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        if slope > cfg.trend_slope_threshold {
            TrendDirection::Rising
        } else if slope < -cfg.trend_slope_threshold {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        }
    }

    /// Depth-weighted mid: mid shifted by `k` times the top-of-book
    /// imbalance. Falls back to the plain mid when a side is empty.
    pub fn weighted_mid(&self, book: &OrderBookEngine, cfg: &FeatureConfig) -> Option<f64> {
        let mid = book.mid_price()?;
        let bid_depth = book.depth_top(BookSide::Bid, cfg.wmp_levels);
        let ask_depth = book.depth_top(BookSide::Ask, cfg.wmp_levels);
        let total = bid_depth + ask_depth;
        if total <= 0.0 {
            return Some(mid);
        }
        Some(mid + cfg.wmp_k * (bid_depth - ask_depth) / total)
    }

    /// EWMA of the top-of-book bid/ask depth ratio. Neutral is 1.0.
    pub fn buy_sell_pressure(&self) -> f64 {
        self.pressure.unwrap_or(1.0)
    }

    /// Rolling mean spread, available once enough history accumulated.
    pub fn avg_spread(&self, cfg: &FeatureConfig) -> Option<f64> {
        if self.spread_history.len() < cfg.spread_min_history {
            return None;
        }
        Some(self.spread_sum / self.spread_history.len() as f64)
    }

    /// Check both sides for a depth collapse deeper than `threshold`.
    /// The bid side wins ties; the ask side stays armed and fires on the
    /// next call if its collapse persists.
    pub fn detect_liquidity_vacuum(
        &mut self,
        threshold: f64,
        now_ms: TimestampMs,
    ) -> Option<VacuumEvent> {
        if let Some(event) = self.bid_vacuum.detect(BookSide::Bid, threshold, now_ms) {
            return Some(event);
        }
        self.ask_vacuum.detect(BookSide::Ask, threshold, now_ms)
    }

    /// Record the current book shape and assemble the tick frame.
    pub fn observe_book(
        &mut self,
        book: &OrderBookEngine,
        cfg: &FeatureConfig,
        now_ms: TimestampMs,
    ) -> FeatureFrame {
        let bid_depth = book.depth_top(BookSide::Bid, cfg.pressure_depth_levels);
        let ask_depth = book.depth_top(BookSide::Ask, cfg.pressure_depth_levels);
        self.bid_vacuum.record(now_ms, bid_depth, cfg.vacuum_interval_ms);
        self.ask_vacuum.record(now_ms, ask_depth, cfg.vacuum_interval_ms);

        if bid_depth > 0.0 && ask_depth > 0.0 {
            let ratio = bid_depth / ask_depth;
            self.pressure = Some(match self.pressure {
                Some(prev) => cfg.pressure_alpha * ratio + (1.0 - cfg.pressure_alpha) * prev,
                None => ratio,
            });
        }

        let spread = book.spread();
        if let Some(s) = spread {
            self.spread_history.push_back(s);
            self.spread_sum += s;
            if self.spread_history.len() > cfg.spread_window {
                if let Some(old) = self.spread_history.pop_front() {
                    self.spread_sum -= old;
                }
            }
        }

        let mid = book.mid_price();
        let spread_band = match (mid, spread) {
            (Some(m), Some(s)) if m > 0.0 => {
                let bps = s / m * 10_000.0;
                Some(if bps > cfg.extreme_spread_bps {
                    SpreadBand::Extreme
                } else if bps > cfg.wide_spread_bps {
                    SpreadBand::Wide
                } else {
                    SpreadBand::Normal
                })
            }
            _ => None,
        };

        FeatureFrame {
            mid,
            spread,
            avg_spread: self.avg_spread(cfg),
            spread_band,
            ofi: self.ofi(cfg.ofi_window),
            ofi_trend: self.ofi_trend(cfg),
            weighted_mid: self.weighted_mid(book, cfg),
            pressure: self.buy_sell_pressure(),
            bid_depth,
            ask_depth,
            avg_level_size: book.average_level_size(),
            vacuum: self.detect_liquidity_vacuum(cfg.vacuum_threshold, now_ms),
        }
    }

    pub fn ofi_history_len(&self) -> usize {
        self.ofi_history.len()
    }

    fn push_ofi(&mut self, delta: f64, timestamp_ms: TimestampMs, cfg: &FeatureConfig) {
        self.ofi_total += delta;
        if self.ofi_history.len() == cfg.ofi_history_cap {
            self.ofi_history.pop_front();
        }
        self.ofi_history.push_back(OfiSample {
            delta,
            cum: self.ofi_total,
            timestamp_ms,
        });
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookConfig;
    use crate::types::DepthEntry;
    use std::sync::Arc;

    fn trade(side: Side, size: f64, ts: TimestampMs) -> Trade {
        Trade {
            trade_id: ts as u64,
            price: 100.0,
            size,
            side,
            timestamp_ms: ts,
        }
    }

    fn entry(price: f64, size: f64) -> DepthEntry {
        DepthEntry {
            price,
            size,
            order_count: 1,
        }
    }

    fn book_with(bids: &[DepthEntry], asks: &[DepthEntry], seq: u64) -> OrderBookEngine {
        let mut book = OrderBookEngine::new(Arc::from("TEST-SWAP"));
        book.apply_snapshot(bids, asks, seq, seq as i64 * 10, &BookConfig::default())
            .expect("snapshot");
        book
    }

    #[test]
    fn ofi_tape_three_buys_one_sell() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        for i in 0..3 {
            eng.on_trade(&trade(Side::Buy, 5.0, 100 + i), &cfg);
        }
        eng.on_trade(&trade(Side::Sell, 20.0, 104), &cfg);
        assert_eq!(eng.ofi(4), -5.0);
        assert_eq!(eng.ofi(1), -20.0);
        assert_eq!(eng.ofi(0), 0.0);
    }

    #[test]
    fn ofi_window_matches_batch_recompute() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        let deltas: [f64; 8] = [3.0, -1.0, 4.0, -2.0, 5.0, -8.0, 2.0, 1.0];
        for (i, d) in deltas.iter().enumerate() {
            let side = if *d > 0.0 { Side::Buy } else { Side::Sell };
            eng.on_trade(&trade(side, d.abs(), i as i64), &cfg);
        }
        for window in 1..=deltas.len() {
            let batch: f64 = deltas[deltas.len() - window..].iter().sum();
            let incremental = eng.ofi(window);
            assert!(
                (incremental - batch).abs() < 1e-9,
                "window={window} incremental={incremental} batch={batch}"
            );
        }
    }

    #[test]
    fn ofi_history_is_capped() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        for i in 0..(cfg.ofi_history_cap + 20) {
            eng.on_trade(&trade(Side::Buy, 1.0, i as i64), &cfg);
        }
        assert_eq!(eng.ofi_history_len(), cfg.ofi_history_cap);
        assert_eq!(eng.ofi(cfg.ofi_history_cap * 2), cfg.ofi_history_cap as f64);
    }

    #[test]
    fn book_deltas_feed_ofi() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        eng.on_book_delta(
            &DeltaStats {
                bid_volume: 10.0,
                ask_volume: 4.0,
            },
            0,
            &cfg,
        );
        assert_eq!(eng.ofi(1), 6.0);
        eng.on_book_delta(
            &DeltaStats {
                bid_volume: 0.0,
                ask_volume: 0.0,
            },
            1,
            &cfg,
        );
        assert_eq!(eng.ofi_history_len(), 1, "zero net change records nothing");
    }

    #[test]
    fn trend_buckets_by_slope() {
        let cfg = FeatureConfig::default();

        let mut rising = FeatureEngine::new();
        for i in 0..cfg.trend_window {
            rising.on_trade(&trade(Side::Buy, 1.0 + i as f64, i as i64), &cfg);
        }
        assert_eq!(rising.ofi_trend(&cfg), TrendDirection::Rising);

        let mut falling = FeatureEngine::new();
        for i in 0..cfg.trend_window {
            falling.on_trade(&trade(Side::Buy, 10.0 - i as f64, i as i64), &cfg);
        }
        assert_eq!(falling.ofi_trend(&cfg), TrendDirection::Falling);

        let mut flat = FeatureEngine::new();
        for i in 0..cfg.trend_window {
            flat.on_trade(&trade(Side::Buy, 5.0, i as i64), &cfg);
        }
        assert_eq!(flat.ofi_trend(&cfg), TrendDirection::Stable);

        assert_eq!(
            FeatureEngine::new().ofi_trend(&cfg),
            TrendDirection::Stable,
            "no history reads stable"
        );
    }

    #[test]
    fn vacuum_fires_once_then_rearms_after_recovery() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        let full = [entry(100.0, 50.0), entry(99.0, 50.0)];
        let asks = [entry(101.0, 50.0), entry(102.0, 50.0)];

        let book = book_with(&full, &asks, 1);
        assert!(eng.observe_book(&book, &cfg, 0).vacuum.is_none());
        assert!(eng.observe_book(&book, &cfg, 50).vacuum.is_none());

        // 60% bid collapse against the window max of 100.
        let dropped = book_with(&[entry(100.0, 20.0), entry(99.0, 20.0)], &asks, 2);
        let event = eng
            .observe_book(&dropped, &cfg, 100)
            .vacuum
            .expect("collapse fires");
        assert_eq!(event.side, BookSide::Bid);
        assert!((event.magnitude - 0.6).abs() < 1e-9, "magnitude {}", event.magnitude);

        // Same collapse again: already fired, stays quiet.
        assert!(eng.observe_book(&dropped, &cfg, 150).vacuum.is_none());

        // Recovery above half the threshold re-arms the side.
        let recovered = book_with(&[entry(100.0, 47.0), entry(99.0, 48.0)], &asks, 3);
        assert!(eng.observe_book(&recovered, &cfg, 200).vacuum.is_none());

        // A fresh collapse fires again.
        let dropped_again = book_with(&[entry(100.0, 15.0), entry(99.0, 15.0)], &asks, 4);
        let event = eng
            .observe_book(&dropped_again, &cfg, 250)
            .vacuum
            .expect("second distinct collapse fires");
        assert_eq!(event.side, BookSide::Bid);
        assert!((event.magnitude - 0.7).abs() < 1e-9);
    }

    #[test]
    fn weighted_mid_leans_toward_depth() {
        let cfg = FeatureConfig::default();
        let eng = FeatureEngine::new();

        let balanced = book_with(&[entry(100.0, 10.0)], &[entry(101.0, 10.0)], 1);
        let wmp = eng.weighted_mid(&balanced, &cfg).expect("mid available");
        assert!((wmp - 100.5).abs() < 1e-9, "balanced book keeps the mid");

        let bid_heavy = book_with(&[entry(100.0, 30.0)], &[entry(101.0, 10.0)], 1);
        let wmp = eng.weighted_mid(&bid_heavy, &cfg).expect("mid available");
        assert!(wmp > 100.5, "bid depth pulls the weighted mid up: {wmp}");
    }

    #[test]
    fn pressure_tracks_depth_ratio() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        assert_eq!(eng.buy_sell_pressure(), 1.0, "neutral before any book");

        let bid_heavy = book_with(&[entry(100.0, 30.0)], &[entry(101.0, 10.0)], 1);
        eng.observe_book(&bid_heavy, &cfg, 0);
        assert!((eng.buy_sell_pressure() - 3.0).abs() < 1e-9, "first sample seeds the EWMA");

        let ask_heavy = book_with(&[entry(100.0, 10.0)], &[entry(101.0, 30.0)], 1);
        eng.observe_book(&ask_heavy, &cfg, 50);
        let after = eng.buy_sell_pressure();
        assert!(after < 3.0 && after > 1.0 / 3.0, "EWMA moves gradually: {after}");
    }

    #[test]
    fn avg_spread_needs_history_and_bands_classify() {
        let cfg = FeatureConfig::default();
        let mut eng = FeatureEngine::new();
        let tight = book_with(&[entry(10_000.0, 1.0)], &[entry(10_001.0, 1.0)], 1);
        for i in 0..cfg.spread_min_history - 1 {
            let frame = eng.observe_book(&tight, &cfg, i as i64 * 10);
            assert_eq!(frame.avg_spread, None, "warming up at {i}");
            assert_eq!(frame.spread_band, Some(SpreadBand::Normal));
        }
        let frame = eng.observe_book(&tight, &cfg, 1_000);
        assert_eq!(frame.avg_spread, Some(1.0));

        let wide = book_with(&[entry(10_000.0, 1.0)], &[entry(10_025.0, 1.0)], 1);
        let frame = eng.observe_book(&wide, &cfg, 1_100);
        assert_eq!(frame.spread_band, Some(SpreadBand::Wide));

        let extreme = book_with(&[entry(10_000.0, 1.0)], &[entry(10_080.0, 1.0)], 1);
        let frame = eng.observe_book(&extreme, &cfg, 1_200);
        assert_eq!(frame.spread_band, Some(SpreadBand::Extreme));
    }
}
