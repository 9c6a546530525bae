// src/orderbook.rs
//
// Deterministic L2 order book mirror with integrity checking.
//
// One engine per instrument. State changes only through deltas and
// snapshots; queries hand out copies annotated with the book status.
// Integrity failures (checksum mismatch, crossed book, sequence errors)
// never kill the mirror: the book latches `Stale` and keeps answering
// from current state until a full snapshot resyncs it.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BookConfig;
use crate::types::{BookDelta, BookSide, DepthEntry, PriceLevel, TimestampMs};

/// Why a book stopped being trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaleReason {
    ChecksumMismatch,
    CrossedBook,
    SeqOutOfOrder,
    SeqGap,
}

/// Trust status attached to every query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookStatus {
    Live,
    Stale(StaleReason),
}

impl BookStatus {
    pub fn is_stale(&self) -> bool {
        matches!(self, BookStatus::Stale(_))
    }
}

/// Integrity failures raised while applying feed messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BookError {
    ChecksumMismatch { expected: u32, computed: u32 },
    CrossedBook { best_bid: f64, best_ask: f64 },
    SeqOutOfOrder { last_seq: u64, incoming_seq: u64 },
    SeqGap { last_seq: u64, incoming_seq: u64 },
    InvalidPrice { price: f64 },
    InvalidSize { size: f64 },
}

/// Net size change per side produced by one delta batch. Removals count
/// negative, insertions positive. Feeds order-flow imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeltaStats {
    pub bid_volume: f64,
    pub ask_volume: f64,
}

/// Copied view of the book for features, strategies, and archival.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub instrument: Arc<str>,
    pub seq: u64,
    pub timestamp_ms: TimestampMs,
    pub status: BookStatus,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookEngine {
    instrument: Arc<str>,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    last_seq: u64,
    last_update_ms: TimestampMs,
    status: BookStatus,
}

impl OrderBookEngine {
    pub fn new(instrument: Arc<str>) -> Self {
        Self {
            instrument,
            bids: Vec::new(),
            asks: Vec::new(),
            last_seq: 0,
            last_update_ms: 0,
            status: BookStatus::Live,
        }
    }

    pub fn instrument(&self) -> &Arc<str> {
        &self.instrument
    }

    pub fn status(&self) -> BookStatus {
        self.status
    }

    pub fn is_stale(&self) -> bool {
        self.status.is_stale()
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn last_update_ms(&self) -> TimestampMs {
        self.last_update_ms
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Replace the full book. The only path that clears staleness.
    pub fn apply_snapshot(
        &mut self,
        bids: &[DepthEntry],
        asks: &[DepthEntry],
        seq: u64,
        now_ms: TimestampMs,
        cfg: &BookConfig,
    ) -> Result<(), BookError> {
        if seq <= self.last_seq {
            return Err(BookError::SeqOutOfOrder {
                last_seq: self.last_seq,
                incoming_seq: seq,
            });
        }
        self.bids = validate_and_sort(bids, true, now_ms)?;
        self.asks = validate_and_sort(asks, false, now_ms)?;
        self.trim(cfg.max_levels_per_side);
        self.last_seq = seq;
        self.last_update_ms = now_ms;
        self.status = BookStatus::Live;
        self.check_crossed()
    }

    /// Apply one incremental batch. A `size == 0` delta removes the level.
    /// The batch is validated before any level is touched, so a malformed
    /// message leaves the book unchanged. Returns the net size change per
    /// side for flow tracking.
    pub fn apply_delta(
        &mut self,
        deltas: &[BookDelta],
        seq: u64,
        now_ms: TimestampMs,
        cfg: &BookConfig,
    ) -> Result<DeltaStats, BookError> {
        if seq <= self.last_seq {
            self.mark_stale(StaleReason::SeqOutOfOrder);
            return Err(BookError::SeqOutOfOrder {
                last_seq: self.last_seq,
                incoming_seq: seq,
            });
        }
        if self.last_seq > 0 && seq != self.last_seq + 1 {
            self.mark_stale(StaleReason::SeqGap);
            return Err(BookError::SeqGap {
                last_seq: self.last_seq,
                incoming_seq: seq,
            });
        }
        for delta in deltas {
            validate_delta(delta)?;
        }
        let mut stats = DeltaStats::default();
        for delta in deltas {
            let eps = cfg.price_epsilon;
            let change = match delta.side {
                BookSide::Bid => apply_delta_to_levels(&mut self.bids, delta, true, eps, now_ms),
                BookSide::Ask => apply_delta_to_levels(&mut self.asks, delta, false, eps, now_ms),
            };
            match delta.side {
                BookSide::Bid => stats.bid_volume += change,
                BookSide::Ask => stats.ask_volume += change,
            }
        }
        self.trim(cfg.max_levels_per_side);
        self.last_seq = seq;
        self.last_update_ms = now_ms;
        self.check_crossed()?;
        Ok(stats)
    }

    /// Single-level hot write, used by the storage coordinator's
    /// `update_level` delegate. No sequence tracking.
    pub fn apply_level(&mut self, delta: &BookDelta, now_ms: TimestampMs, cfg: &BookConfig) {
        if validate_delta(delta).is_err() {
            return;
        }
        let eps = cfg.price_epsilon;
        match delta.side {
            BookSide::Bid => apply_delta_to_levels(&mut self.bids, delta, true, eps, now_ms),
            BookSide::Ask => apply_delta_to_levels(&mut self.asks, delta, false, eps, now_ms),
        };
        self.trim(cfg.max_levels_per_side);
        self.last_update_ms = now_ms;
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Cumulative size within `band` of the best price on one side.
    /// An empty side contributes zero.
    pub fn depth_at(&self, side: BookSide, band: f64) -> f64 {
        if band < 0.0 {
            return 0.0;
        }
        match side {
            BookSide::Bid => {
                let Some(best) = self.best_bid() else {
                    return 0.0;
                };
                let floor = best.price - band;
                self.bids
                    .iter()
                    .take_while(|l| l.price >= floor)
                    .map(|l| l.size)
                    .sum()
            }
            BookSide::Ask => {
                let Some(best) = self.best_ask() else {
                    return 0.0;
                };
                let cap = best.price + band;
                self.asks
                    .iter()
                    .take_while(|l| l.price <= cap)
                    .map(|l| l.size)
                    .sum()
            }
        }
    }

    /// Sum of sizes on the top `levels` of one side.
    pub fn depth_top(&self, side: BookSide, levels: usize) -> f64 {
        let side_levels = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };
        side_levels.iter().take(levels).map(|l| l.size).sum()
    }

    /// Mean resting size across both sides, the wall baseline.
    pub fn average_level_size(&self) -> Option<f64> {
        let count = self.bids.len() + self.asks.len();
        if count == 0 {
            return None;
        }
        let total: f64 = self.bids.iter().chain(self.asks.iter()).map(|l| l.size).sum();
        Some(total / count as f64)
    }

    /// CRC32 over `"{price}:{size}:"` for the top checksum levels, bids
    /// then asks, rendered at integer precision to match the venue's
    /// published algorithm.
    pub fn compute_checksum(&self, cfg: &BookConfig) -> u32 {
        let mut payload = String::new();
        for level in self.bids.iter().take(cfg.checksum_levels) {
            let _ = write!(payload, "{:.0}:{:.0}:", level.price, level.size);
        }
        for level in self.asks.iter().take(cfg.checksum_levels) {
            let _ = write!(payload, "{:.0}:{:.0}:", level.price, level.size);
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload.as_bytes());
        hasher.finalize()
    }

    /// Compare the local checksum against the feed's. A mismatch latches
    /// staleness; the caller must request a full snapshot.
    pub fn verify_checksum(&mut self, expected: u32, cfg: &BookConfig) -> Result<(), BookError> {
        let computed = self.compute_checksum(cfg);
        if computed != expected {
            self.mark_stale(StaleReason::ChecksumMismatch);
            return Err(BookError::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }

    /// Copy the top `depth` levels per side, annotated with status.
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            instrument: self.instrument.clone(),
            seq: self.last_seq,
            timestamp_ms: self.last_update_ms,
            status: self.status,
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
        }
    }

    fn trim(&mut self, max_levels: usize) {
        if self.bids.len() > max_levels {
            self.bids.truncate(max_levels);
        }
        if self.asks.len() > max_levels {
            self.asks.truncate(max_levels);
        }
    }

    fn check_crossed(&mut self) -> Result<(), BookError> {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.price >= ask.price {
                self.mark_stale(StaleReason::CrossedBook);
                return Err(BookError::CrossedBook {
                    best_bid: bid.price,
                    best_ask: ask.price,
                });
            }
        }
        Ok(())
    }

    fn mark_stale(&mut self, reason: StaleReason) {
        if !self.status.is_stale() {
            eprintln!(
                "BOOK_STALE instrument={} reason={:?} seq={}",
                self.instrument, reason, self.last_seq
            );
            self.status = BookStatus::Stale(reason);
        }
    }
}

fn validate_delta(delta: &BookDelta) -> Result<(), BookError> {
    if !delta.price.is_finite() || delta.price <= 0.0 {
        return Err(BookError::InvalidPrice { price: delta.price });
    }
    if !delta.size.is_finite() || delta.size < 0.0 {
        return Err(BookError::InvalidSize { size: delta.size });
    }
    Ok(())
}

fn validate_and_sort(
    entries: &[DepthEntry],
    is_bid: bool,
    now_ms: TimestampMs,
) -> Result<Vec<PriceLevel>, BookError> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if !entry.price.is_finite() || entry.price <= 0.0 {
            return Err(BookError::InvalidPrice { price: entry.price });
        }
        if !entry.size.is_finite() || entry.size < 0.0 {
            return Err(BookError::InvalidSize { size: entry.size });
        }
        if entry.size == 0.0 {
            continue;
        }
        out.push(PriceLevel {
            price: entry.price,
            size: entry.size,
            order_count: entry.order_count,
            last_update_ms: now_ms,
        });
    }
    out.sort_by(|a, b| compare_prices(a.price, b.price, is_bid));
    Ok(out)
}

fn apply_delta_to_levels(
    levels: &mut Vec<PriceLevel>,
    delta: &BookDelta,
    is_bid: bool,
    eps: f64,
    now_ms: TimestampMs,
) -> f64 {
    match find_slot(levels, delta.price, is_bid, eps) {
        Ok(idx) => {
            if delta.size == 0.0 {
                let removed = levels.remove(idx);
                -removed.size
            } else {
                let level = &mut levels[idx];
                let change = delta.size - level.size;
                level.size = delta.size;
                level.order_count = delta.order_count;
                level.last_update_ms = now_ms;
                change
            }
        }
        Err(idx) => {
            if delta.size == 0.0 {
                return 0.0;
            }
            levels.insert(
                idx,
                PriceLevel {
                    price: delta.price,
                    size: delta.size,
                    order_count: delta.order_count,
                    last_update_ms: now_ms,
                },
            );
            delta.size
        }
    }
}

/// Binary search in a price-sorted side. `Ok` carries the index of the
/// level matching within `eps`; `Err` the insertion index.
fn find_slot(levels: &[PriceLevel], price: f64, is_bid: bool, eps: f64) -> Result<usize, usize> {
    let idx = if is_bid {
        levels.partition_point(|l| l.price > price + eps)
    } else {
        levels.partition_point(|l| l.price < price - eps)
    };
    if idx < levels.len() && (levels[idx].price - price).abs() <= eps {
        Ok(idx)
    } else {
        Err(idx)
    }
}

fn compare_prices(a: f64, b: f64, is_bid: bool) -> Ordering {
    if is_bid {
        b.total_cmp(&a)
    } else {
        a.total_cmp(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(side: BookSide, price: f64, size: f64) -> BookDelta {
        BookDelta {
            side,
            price,
            size,
            order_count: 1,
        }
    }

    fn entry(price: f64, size: f64) -> DepthEntry {
        DepthEntry {
            price,
            size,
            order_count: 1,
        }
    }

    fn fresh_book() -> (OrderBookEngine, BookConfig) {
        (
            OrderBookEngine::new(Arc::from("TEST-SWAP")),
            BookConfig::default(),
        )
    }

    #[test]
    fn zero_size_delta_removes_and_readd_restores() {
        let (mut book, cfg) = fresh_book();
        book.apply_delta(
            &[delta(BookSide::Bid, 100.0, 10.0), delta(BookSide::Bid, 99.0, 5.0)],
            1,
            1_000,
            &cfg,
        )
        .expect("initial deltas");
        assert_eq!(book.best_bid().map(|l| l.price), Some(100.0));

        book.apply_delta(&[delta(BookSide::Bid, 100.0, 0.0)], 2, 1_100, &cfg)
            .expect("removal delta");
        assert_eq!(
            book.best_bid().map(|l| (l.price, l.size)),
            Some((99.0, 5.0)),
            "removal promotes next level"
        );
        assert_eq!(book.bids().len(), 1);

        book.apply_delta(&[delta(BookSide::Bid, 100.0, 7.0)], 3, 1_200, &cfg)
            .expect("re-add delta");
        assert_eq!(
            book.best_bid().map(|l| (l.price, l.size)),
            Some((100.0, 7.0)),
            "re-added level restored at the top"
        );
    }

    #[test]
    fn level_cap_evicts_worst_first() {
        let (mut book, cfg) = fresh_book();
        let bids: Vec<DepthEntry> = (0..cfg.max_levels_per_side)
            .map(|i| entry(10_000.0 - i as f64, 1.0))
            .collect();
        book.apply_snapshot(&bids, &[entry(20_000.0, 1.0)], 1, 0, &cfg)
            .expect("full snapshot");
        assert_eq!(book.bids().len(), cfg.max_levels_per_side);
        let worst_before = book.bids().last().map(|l| l.price).unwrap();

        // A better price than the worst pushes the worst out.
        book.apply_delta(&[delta(BookSide::Bid, 9_999.5, 2.0)], 2, 10, &cfg)
            .expect("401st level");
        assert_eq!(book.bids().len(), cfg.max_levels_per_side);
        let worst_after = book.bids().last().map(|l| l.price).unwrap();
        assert!(
            worst_after > worst_before,
            "worst level evicted: before={worst_before} after={worst_after}"
        );
    }

    #[test]
    fn crossed_book_latches_stale_but_keeps_answering() {
        let (mut book, cfg) = fresh_book();
        book.apply_snapshot(&[entry(100.0, 1.0)], &[entry(101.0, 1.0)], 1, 0, &cfg)
            .expect("snapshot");
        let err = book
            .apply_delta(&[delta(BookSide::Bid, 101.5, 1.0)], 2, 10, &cfg)
            .unwrap_err();
        assert!(matches!(err, BookError::CrossedBook { .. }));
        assert_eq!(book.status(), BookStatus::Stale(StaleReason::CrossedBook));
        assert!(
            book.best_bid().is_some(),
            "stale book still serves its state"
        );
        assert!(book.snapshot(5).status.is_stale());
    }

    #[test]
    fn snapshot_clears_staleness() {
        let (mut book, cfg) = fresh_book();
        book.apply_snapshot(&[entry(100.0, 1.0)], &[entry(101.0, 1.0)], 1, 0, &cfg)
            .expect("snapshot");
        let _ = book.apply_delta(&[delta(BookSide::Bid, 102.0, 1.0)], 2, 10, &cfg);
        assert!(book.is_stale());
        book.apply_snapshot(&[entry(100.0, 1.0)], &[entry(101.0, 1.0)], 3, 20, &cfg)
            .expect("resync snapshot");
        assert_eq!(book.status(), BookStatus::Live);
    }

    #[test]
    fn checksum_is_deterministic_and_size_sensitive() {
        let (mut a, cfg) = fresh_book();
        let (mut b, _) = fresh_book();
        let bids = [entry(100.0, 10.0), entry(99.0, 5.0)];
        let asks = [entry(101.0, 8.0), entry(102.0, 3.0)];
        a.apply_snapshot(&bids, &asks, 1, 0, &cfg).expect("a");
        b.apply_snapshot(&bids, &asks, 1, 0, &cfg).expect("b");
        assert_eq!(a.compute_checksum(&cfg), b.compute_checksum(&cfg));
        assert_eq!(a.compute_checksum(&cfg), a.compute_checksum(&cfg));

        b.apply_delta(&[delta(BookSide::Bid, 100.0, 11.0)], 2, 5, &cfg)
            .expect("size change");
        assert_ne!(
            a.compute_checksum(&cfg),
            b.compute_checksum(&cfg),
            "size change must alter the checksum"
        );
    }

    #[test]
    fn checksum_mismatch_marks_stale() {
        let (mut book, cfg) = fresh_book();
        book.apply_snapshot(&[entry(100.0, 1.0)], &[entry(101.0, 1.0)], 1, 0, &cfg)
            .expect("snapshot");
        let good = book.compute_checksum(&cfg);
        book.verify_checksum(good, &cfg).expect("match keeps live");
        assert_eq!(book.status(), BookStatus::Live);

        let err = book.verify_checksum(good ^ 1, &cfg).unwrap_err();
        assert!(matches!(err, BookError::ChecksumMismatch { .. }));
        assert_eq!(
            book.status(),
            BookStatus::Stale(StaleReason::ChecksumMismatch)
        );
    }

    #[test]
    fn seq_regression_and_gap_mark_stale() {
        let (mut book, cfg) = fresh_book();
        book.apply_delta(&[delta(BookSide::Bid, 100.0, 1.0)], 1, 0, &cfg)
            .expect("seed");
        let err = book
            .apply_delta(&[delta(BookSide::Bid, 99.0, 1.0)], 1, 10, &cfg)
            .unwrap_err();
        assert!(matches!(err, BookError::SeqOutOfOrder { .. }));
        assert_eq!(book.status(), BookStatus::Stale(StaleReason::SeqOutOfOrder));

        let (mut book, cfg) = fresh_book();
        book.apply_delta(&[delta(BookSide::Bid, 100.0, 1.0)], 1, 0, &cfg)
            .expect("seed");
        let err = book
            .apply_delta(&[delta(BookSide::Bid, 99.0, 1.0)], 5, 10, &cfg)
            .unwrap_err();
        assert!(matches!(
            err,
            BookError::SeqGap {
                last_seq: 1,
                incoming_seq: 5
            }
        ));
    }

    #[test]
    fn malformed_batch_leaves_book_unchanged() {
        let (mut book, cfg) = fresh_book();
        book.apply_delta(&[delta(BookSide::Bid, 100.0, 1.0)], 1, 0, &cfg)
            .expect("seed");
        let before = book.clone();
        let err = book
            .apply_delta(
                &[
                    delta(BookSide::Bid, 99.0, 2.0),
                    delta(BookSide::Bid, -1.0, 2.0),
                ],
                2,
                10,
                &cfg,
            )
            .unwrap_err();
        assert!(matches!(err, BookError::InvalidPrice { .. }));
        assert_eq!(book.bids(), before.bids(), "no partial application");
    }

    #[test]
    fn depth_at_sums_within_band() {
        let (mut book, cfg) = fresh_book();
        book.apply_snapshot(
            &[entry(100.0, 10.0), entry(99.0, 5.0), entry(95.0, 50.0)],
            &[entry(101.0, 8.0), entry(102.0, 3.0), entry(110.0, 40.0)],
            1,
            0,
            &cfg,
        )
        .expect("snapshot");
        assert_eq!(book.depth_at(BookSide::Bid, 1.0), 15.0);
        assert_eq!(book.depth_at(BookSide::Ask, 1.0), 11.0);
        assert_eq!(book.depth_at(BookSide::Bid, 0.0), 10.0);
        assert_eq!(book.depth_at(BookSide::Ask, 100.0), 51.0);
    }

    #[test]
    fn delta_stats_report_signed_volume_changes() {
        let (mut book, cfg) = fresh_book();
        let stats = book
            .apply_delta(
                &[
                    delta(BookSide::Bid, 100.0, 10.0),
                    delta(BookSide::Ask, 101.0, 4.0),
                ],
                1,
                0,
                &cfg,
            )
            .expect("seed");
        assert_eq!(stats.bid_volume, 10.0);
        assert_eq!(stats.ask_volume, 4.0);

        let stats = book
            .apply_delta(&[delta(BookSide::Bid, 100.0, 6.0)], 2, 10, &cfg)
            .expect("shrink");
        assert_eq!(stats.bid_volume, -4.0);

        let stats = book
            .apply_delta(&[delta(BookSide::Ask, 101.0, 0.0)], 3, 20, &cfg)
            .expect("remove");
        assert_eq!(stats.ask_volume, -4.0);
    }

    #[test]
    fn mid_price_unavailable_with_empty_side() {
        let (mut book, cfg) = fresh_book();
        assert_eq!(book.mid_price(), None);
        book.apply_delta(&[delta(BookSide::Bid, 100.0, 1.0)], 1, 0, &cfg)
            .expect("bid only");
        assert_eq!(book.mid_price(), None, "one-sided book has no mid");
        assert_eq!(book.best_ask(), None);
    }
}
