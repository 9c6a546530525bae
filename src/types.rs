// src/types.rs
//
// Core value types shared across the decision pipeline.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// Milliseconds since Unix epoch.
pub type TimestampMs = i64;

/// UTC trading date for a timestamp. Pre-epoch or overflowed inputs
/// collapse to the epoch date rather than panicking.
pub fn utc_date(ms: TimestampMs) -> NaiveDate {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .date_naive()
}

/// Trade aggressor / signal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn flip(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Sign convention used for position arithmetic: long positive.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(self) -> &'static str {
        match self {
            BookSide::Bid => "bid",
            BookSide::Ask => "ask",
        }
    }
}

/// One resting level of the local book mirror.
///
/// A level with `size == 0` must never be stored; a zero-size delta is a
/// removal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
    pub order_count: u32,
    pub last_update_ms: TimestampMs,
}

/// Depth entry as carried by feed snapshots (no local bookkeeping fields).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthEntry {
    pub price: f64,
    pub size: f64,
    pub order_count: u32,
}

/// One incremental depth change from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
    pub order_count: u32,
}

/// Executed trade from the tape. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub timestamp_ms: TimestampMs,
}

/// Messages delivered by the market-data collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedMessage {
    /// Incremental depth update. `checksum` is the venue's CRC32 over the
    /// top levels after this message is applied; `None` when the venue
    /// omits it.
    Delta {
        seq: u64,
        deltas: Vec<BookDelta>,
        checksum: Option<u32>,
        timestamp_ms: TimestampMs,
    },
    /// Full book replacement, used on resync.
    Snapshot {
        seq: u64,
        bids: Vec<DepthEntry>,
        asks: Vec<DepthEntry>,
        timestamp_ms: TimestampMs,
    },
    Trade(Trade),
}

impl FeedMessage {
    pub fn timestamp_ms(&self) -> TimestampMs {
        match self {
            FeedMessage::Delta { timestamp_ms, .. } => *timestamp_ms,
            FeedMessage::Snapshot { timestamp_ms, .. } => *timestamp_ms,
            FeedMessage::Trade(t) => t.timestamp_ms,
        }
    }
}

/// Strategy identifiers, listed in arbitration priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyId {
    FrontRun,
    WallRide,
    SpreadCapture,
}

impl StrategyId {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyId::FrontRun => "front_run",
            StrategyId::WallRide => "wall_ride",
            StrategyId::SpreadCapture => "spread_capture",
        }
    }
}

/// Trade intent produced by a strategy.
///
/// Consumed exactly once by the risk gate, then forwarded to execution or
/// dropped. Never retried by the pipeline. `price` carries the resting
/// limit price when the strategy specifies one.
///
/// Note: `instrument` uses `Arc<str>` for cheap cloning in hot paths, so
/// this type stays out of serde; telemetry renders its fields explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySignal {
    pub strategy: StrategyId,
    pub instrument: Arc<str>,
    pub side: Side,
    pub price: Option<f64>,
    pub size: f64,
    pub confidence: f64,
    pub reason: String,
    pub timestamp_ms: TimestampMs,
}

/// Cross-process position record. The authoritative copy lives in the warm
/// tier under `position:{instrument}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub avg_price: f64,
    pub updated_ms: TimestampMs,
}

impl Position {
    pub fn flat(instrument: &str, now_ms: TimestampMs) -> Self {
        Self {
            instrument: instrument.to_string(),
            side: Side::Buy,
            size: 0.0,
            avg_price: 0.0,
            updated_ms: now_ms,
        }
    }

    /// Long positive, short negative.
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Fold one fill into the position. Same-side fills extend at a
    /// size-weighted average price; opposite-side fills reduce, flipping
    /// through zero when the fill is larger than the position.
    pub fn apply_fill(&mut self, side: Side, price: f64, size: f64, now_ms: TimestampMs) {
        if size <= 0.0 {
            return;
        }
        self.updated_ms = now_ms;
        if self.size == 0.0 {
            self.side = side;
            self.size = size;
            self.avg_price = price;
            return;
        }
        if side == self.side {
            let total = self.size + size;
            self.avg_price = (self.avg_price * self.size + price * size) / total;
            self.size = total;
            return;
        }
        if size < self.size {
            self.size -= size;
        } else if size > self.size {
            self.side = side;
            self.avg_price = price;
            self.size = size - self.size;
        } else {
            self.size = 0.0;
            self.avg_price = 0.0;
        }
    }
}

/// Fill notification from the execution collaborator.
///
/// `pnl_delta` is the realized PnL contribution reported by the execution
/// side, which knows the closed entry price and fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillNotice {
    pub strategy: StrategyId,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub pnl_delta: f64,
    pub timestamp_ms: TimestampMs,
}

/// Feedback events returned by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    Fill(FillNotice),
    Ack {
        strategy: StrategyId,
        timestamp_ms: TimestampMs,
    },
    CancelConfirm {
        strategy: StrategyId,
        timestamp_ms: TimestampMs,
    },
}

impl ExecutionEvent {
    pub fn strategy(&self) -> StrategyId {
        match self {
            ExecutionEvent::Fill(f) => f.strategy,
            ExecutionEvent::Ack { strategy, .. } => *strategy,
            ExecutionEvent::CancelConfirm { strategy, .. } => *strategy,
        }
    }
}

/// One OHLCV bar aggregated from the trade tape. Cold tier only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub start_ms: TimestampMs,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_flip_and_sign() {
        assert_eq!(Side::Buy.flip(), Side::Sell);
        assert_eq!(Side::Sell.flip(), Side::Buy);
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
    }

    #[test]
    fn position_extends_same_side_at_weighted_avg() {
        let mut pos = Position::flat("BTC-USDT-SWAP", 0);
        pos.apply_fill(Side::Buy, 100.0, 2.0, 1);
        pos.apply_fill(Side::Buy, 110.0, 2.0, 2);
        assert_eq!(pos.side, Side::Buy);
        assert_eq!(pos.size, 4.0);
        assert!((pos.avg_price - 105.0).abs() < 1e-9, "weighted avg price");
    }

    #[test]
    fn position_flips_through_zero() {
        let mut pos = Position::flat("BTC-USDT-SWAP", 0);
        pos.apply_fill(Side::Buy, 100.0, 1.0, 1);
        pos.apply_fill(Side::Sell, 105.0, 3.0, 2);
        assert_eq!(pos.side, Side::Sell);
        assert_eq!(pos.size, 2.0);
        assert_eq!(pos.avg_price, 105.0);
        assert_eq!(pos.signed_size(), -2.0);
    }

    #[test]
    fn position_exact_close_goes_flat() {
        let mut pos = Position::flat("BTC-USDT-SWAP", 0);
        pos.apply_fill(Side::Sell, 50.0, 1.5, 1);
        pos.apply_fill(Side::Buy, 49.0, 1.5, 2);
        assert_eq!(pos.size, 0.0);
        assert_eq!(pos.avg_price, 0.0);
    }

    #[test]
    fn utc_date_matches_known_epoch() {
        // 2024-01-02 00:00:00 UTC
        let date = utc_date(1_704_153_600_000);
        assert_eq!(date.to_string(), "2024-01-02");
    }
}
