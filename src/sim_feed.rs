// src/sim_feed.rs
//
// Deterministic synthetic market-data feed for the demo binary and
// scenario tests. The feed maintains its own mirror of the book it is
// describing, so every delta batch carries a checksum computed over the
// post-batch state; a consumer that mirrors the stream correctly always
// verifies.
//
// Prices stay on a whole-number grid so the integer-precision checksum
// payload never collides across adjacent levels.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{BookConfig, Config};
use crate::orderbook::OrderBookEngine;
use crate::types::{BookDelta, BookSide, DepthEntry, FeedMessage, Side, TimestampMs, Trade};

const TICK: f64 = 1.0;
const BASE_MID: f64 = 25_000.0;
const DEPTH_LEVELS: usize = 15;

/// Synthetic feed with a deterministic message stream per seed.
pub struct SimFeed {
    rng: ChaCha8Rng,
    instrument: Arc<str>,
    book_cfg: BookConfig,
    mirror: OrderBookEngine,
    seq: u64,
    mid: f64,
    next_trade_id: u64,
    corrupt_next: bool,
    snapshot_pending: bool,
}

impl SimFeed {
    pub fn new(cfg: &Config, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            instrument: cfg.instrument.clone(),
            book_cfg: cfg.book.clone(),
            mirror: OrderBookEngine::new(cfg.instrument.clone()),
            seq: 0,
            mid: BASE_MID,
            next_trade_id: 1,
            corrupt_next: false,
            snapshot_pending: false,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn mid(&self) -> f64 {
        self.mid
    }

    /// Corrupt the checksum on the next delta message. Demo/test hook
    /// for exercising the consumer's resync path.
    pub fn corrupt_next_checksum(&mut self) {
        self.corrupt_next = true;
    }

    /// Serve a full snapshot as the next message. Called by the driver
    /// when the consumer reports a stale book.
    pub fn request_snapshot(&mut self) {
        self.snapshot_pending = true;
    }

    /// First message of a session: a full book around the base mid.
    pub fn initial_snapshot(&mut self, now_ms: TimestampMs) -> FeedMessage {
        self.build_snapshot(now_ms)
    }

    /// Produce the next message in the stream.
    pub fn next_message(&mut self, now_ms: TimestampMs) -> FeedMessage {
        if self.snapshot_pending || self.mirror.is_stale() {
            self.snapshot_pending = false;
            return self.build_snapshot(now_ms);
        }

        let roll = self.rng.gen_range(0..100);
        if roll < 55 {
            self.delta_message(now_ms)
        } else if roll < 80 {
            self.trade_message(now_ms)
        } else if roll < 90 {
            self.wall_message(now_ms)
        } else {
            self.pull_message(now_ms)
        }
    }

    fn build_snapshot(&mut self, now_ms: TimestampMs) -> FeedMessage {
        let stamp = self.stamp(now_ms);
        if self.mirror.last_seq() == 0 {
            // Fresh session: generate the book.
            let mut bids = Vec::with_capacity(DEPTH_LEVELS);
            let mut asks = Vec::with_capacity(DEPTH_LEVELS);
            for i in 0..DEPTH_LEVELS {
                let depth = (i + 1) as f64 * TICK;
                bids.push(DepthEntry {
                    price: self.mid - depth,
                    size: self.rng.gen_range(5..25) as f64,
                    order_count: self.rng.gen_range(1..6),
                });
                asks.push(DepthEntry {
                    price: self.mid + depth,
                    size: self.rng.gen_range(5..25) as f64,
                    order_count: self.rng.gen_range(1..6),
                });
            }
            self.seq += 1;
            let _ = self
                .mirror
                .apply_snapshot(&bids, &asks, self.seq, stamp, &self.book_cfg);
            return FeedMessage::Snapshot {
                seq: self.seq,
                bids,
                asks,
                timestamp_ms: stamp,
            };
        }

        // Resync: replay the mirror as-is.
        let to_entries = |levels: &[crate::types::PriceLevel]| {
            levels
                .iter()
                .map(|l| DepthEntry {
                    price: l.price,
                    size: l.size,
                    order_count: l.order_count,
                })
                .collect::<Vec<_>>()
        };
        let bids = to_entries(self.mirror.bids());
        let asks = to_entries(self.mirror.asks());
        self.seq += 1;
        let _ = self
            .mirror
            .apply_snapshot(&bids, &asks, self.seq, stamp, &self.book_cfg);
        FeedMessage::Snapshot {
            seq: self.seq,
            bids,
            asks,
            timestamp_ms: stamp,
        }
    }

    fn delta_message(&mut self, now_ms: TimestampMs) -> FeedMessage {
        let mut batch = Vec::new();

        // Occasionally drift the mid one tick, clearing whatever the
        // drift leaves on the wrong side of the touch.
        if self.rng.gen_bool(0.25) {
            if self.rng.gen_bool(0.5) {
                self.mid += TICK;
                let crossing: Vec<f64> = self
                    .mirror
                    .asks()
                    .iter()
                    .take_while(|l| l.price <= self.mid + 1e-9)
                    .map(|l| l.price)
                    .collect();
                for price in crossing {
                    batch.push(BookDelta {
                        side: BookSide::Ask,
                        price,
                        size: 0.0,
                        order_count: 0,
                    });
                }
            } else {
                self.mid -= TICK;
                let crossing: Vec<f64> = self
                    .mirror
                    .bids()
                    .iter()
                    .take_while(|l| l.price >= self.mid - 1e-9)
                    .map(|l| l.price)
                    .collect();
                for price in crossing {
                    batch.push(BookDelta {
                        side: BookSide::Bid,
                        price,
                        size: 0.0,
                        order_count: 0,
                    });
                }
            }
        }

        let adds = self.rng.gen_range(1..=3);
        for _ in 0..adds {
            let bid = self.rng.gen_bool(0.5);
            let depth = self.rng.gen_range(1..=DEPTH_LEVELS) as f64 * TICK;
            let remove = self.rng.gen_bool(0.2);
            let size = if remove {
                0.0
            } else {
                self.rng.gen_range(1..40) as f64
            };
            batch.push(BookDelta {
                side: if bid { BookSide::Bid } else { BookSide::Ask },
                price: if bid { self.mid - depth } else { self.mid + depth },
                size,
                order_count: if remove { 0 } else { self.rng.gen_range(1..8) },
            });
        }

        self.ship_batch(batch, now_ms)
    }

    /// One oversized resting level a few ticks off the touch.
    fn wall_message(&mut self, now_ms: TimestampMs) -> FeedMessage {
        let bid = self.rng.gen_bool(0.5);
        let depth = self.rng.gen_range(2..=4) as f64 * TICK;
        let batch = vec![BookDelta {
            side: if bid { BookSide::Bid } else { BookSide::Ask },
            price: if bid { self.mid - depth } else { self.mid + depth },
            size: self.rng.gen_range(150..400) as f64,
            order_count: self.rng.gen_range(1..4),
        }];
        self.ship_batch(batch, now_ms)
    }

    /// Yank most of one side in a single batch. Depth collapses fast
    /// enough to register as a liquidity vacuum downstream.
    fn pull_message(&mut self, now_ms: TimestampMs) -> FeedMessage {
        let bid = self.rng.gen_bool(0.5);
        let levels = if bid {
            self.mirror.bids()
        } else {
            self.mirror.asks()
        };
        let keep = 3.min(levels.len());
        let pulled: Vec<f64> = levels
            .iter()
            .skip(keep)
            .map(|l| l.price)
            .collect();
        let side = if bid { BookSide::Bid } else { BookSide::Ask };
        let batch: Vec<BookDelta> = pulled
            .into_iter()
            .map(|price| BookDelta {
                side,
                price,
                size: 0.0,
                order_count: 0,
            })
            .collect();
        if batch.is_empty() {
            return self.delta_message(now_ms);
        }
        self.ship_batch(batch, now_ms)
    }

    fn trade_message(&mut self, now_ms: TimestampMs) -> FeedMessage {
        let aggressor_buy = self.rng.gen_bool(0.5);
        let price = if aggressor_buy {
            self.mirror.best_ask().map(|l| l.price)
        } else {
            self.mirror.best_bid().map(|l| l.price)
        }
        .unwrap_or(self.mid);
        let trade = Trade {
            trade_id: self.next_trade_id,
            price,
            size: self.rng.gen_range(1..10) as f64,
            side: if aggressor_buy { Side::Buy } else { Side::Sell },
            timestamp_ms: self.stamp(now_ms),
        };
        self.next_trade_id += 1;
        FeedMessage::Trade(trade)
    }

    fn ship_batch(&mut self, batch: Vec<BookDelta>, now_ms: TimestampMs) -> FeedMessage {
        let stamp = self.stamp(now_ms);
        self.seq += 1;
        let _ = self.mirror.apply_delta(&batch, self.seq, stamp, &self.book_cfg);
        let mut checksum = self.mirror.compute_checksum(&self.book_cfg);
        if self.corrupt_next {
            self.corrupt_next = false;
            checksum ^= 0x5A5A_5A5A;
        }
        FeedMessage::Delta {
            seq: self.seq,
            deltas: batch,
            checksum: Some(checksum),
            timestamp_ms: stamp,
        }
    }

    /// Message timestamps trail the driver clock by a small jitter so
    /// latency sampling downstream sees realistic gaps.
    fn stamp(&mut self, now_ms: TimestampMs) -> TimestampMs {
        now_ms - self.rng.gen_range(0..25)
    }
}
