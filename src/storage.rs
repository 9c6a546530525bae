// src/storage.rs
//
// Tiered storage coordinator. Routes every read and write to the tier
// that owns it:
//
//   hot  - in-process: the book mirror, the trade tape, open OHLCV bar.
//          Synchronous, never fails.
//   warm - shared operational state behind `WarmStore`. May fail; reads
//          degrade to the last cached value and trading continues.
//   cold - append-only archives shipped to the background writer on a
//          fixed cadence. Failures are logged and dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::cold_store::{BookArchive, ColdRecord, ColdWriter};
use crate::config::Config;
use crate::orderbook::OrderBookEngine;
use crate::types::{BookDelta, OhlcvBar, Position, TimestampMs, Trade};
use crate::warm_store::{LockToken, WarmStore, WarmStoreError};

/// Fixed-cadence trigger for cold flushes, driven by feed time so runs
/// replay deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushScheduler {
    interval_ms: i64,
    next_ms: Option<TimestampMs>,
}

impl FlushScheduler {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            next_ms: None,
        }
    }

    /// First poll arms the schedule; later polls report readiness.
    pub fn due(&mut self, now_ms: TimestampMs) -> bool {
        match self.next_ms {
            None => {
                self.next_ms = Some(now_ms + self.interval_ms);
                false
            }
            Some(next) => now_ms >= next,
        }
    }

    pub fn mark_ran(&mut self, now_ms: TimestampMs) {
        self.next_ms = Some(now_ms + self.interval_ms);
    }
}

/// Accumulates trades into fixed-width bars. Emits a bar once the first
/// trade of the next window arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBuilder {
    bar_ms: i64,
    current: Option<OhlcvBar>,
}

impl OhlcvBuilder {
    pub fn new(bar_ms: i64) -> Self {
        Self {
            bar_ms: bar_ms.max(1),
            current: None,
        }
    }

    pub fn on_trade(&mut self, trade: &Trade) -> Option<OhlcvBar> {
        let start_ms = trade.timestamp_ms - trade.timestamp_ms.rem_euclid(self.bar_ms);
        match &mut self.current {
            Some(bar) if bar.start_ms == start_ms => {
                bar.high = bar.high.max(trade.price);
                bar.low = bar.low.min(trade.price);
                bar.close = trade.price;
                bar.volume += trade.size;
                None
            }
            _ => self.current.replace(OhlcvBar {
                start_ms,
                open: trade.price,
                high: trade.price,
                low: trade.price,
                close: trade.price,
                volume: trade.size,
            }),
        }
    }

    pub fn take_open_bar(&mut self) -> Option<OhlcvBar> {
        self.current.take()
    }
}

/// Last known warm values, served while the warm store is unreachable.
#[derive(Debug, Clone, Default)]
struct WarmCache {
    position: Option<Position>,
    balances: HashMap<String, f64>,
    switches: HashMap<String, bool>,
    risk_params: HashMap<String, f64>,
    daily_pnl: f64,
}

pub struct TieredStorageCoordinator {
    instrument: Arc<str>,
    tape: VecDeque<Trade>,
    pending_trades: Vec<Trade>,
    completed_bars: Vec<OhlcvBar>,
    ohlcv: OhlcvBuilder,
    warm: Box<dyn WarmStore>,
    cache: WarmCache,
    warm_degraded: bool,
    cold: ColdWriter,
    flush: FlushScheduler,
}

impl TieredStorageCoordinator {
    pub fn new(cfg: &Config, warm: Box<dyn WarmStore>) -> Self {
        Self {
            instrument: cfg.instrument.clone(),
            tape: VecDeque::with_capacity(cfg.storage.trade_tape_cap),
            pending_trades: Vec::new(),
            completed_bars: Vec::new(),
            ohlcv: OhlcvBuilder::new(cfg.storage.ohlcv_bar_ms),
            warm,
            cache: WarmCache::default(),
            warm_degraded: false,
            cold: ColdWriter::spawn(cfg.storage.cold_dir.clone()),
            flush: FlushScheduler::new(cfg.storage.cold_flush_interval_ms),
        }
    }

    pub fn warm_degraded(&self) -> bool {
        self.warm_degraded
    }

    // ---- hot tier ----

    /// Hot book write. Integrity problems surface through the book's own
    /// status, never as a storage failure.
    pub fn update_level(
        &mut self,
        book: &mut OrderBookEngine,
        delta: &BookDelta,
        now_ms: TimestampMs,
        cfg: &Config,
    ) {
        book.apply_level(delta, now_ms, &cfg.book);
    }

    /// Append to the tape, the pending cold batch, and the open bar.
    pub fn record_trade(&mut self, trade: &Trade, cfg: &Config) {
        if self.tape.len() == cfg.storage.trade_tape_cap {
            self.tape.pop_front();
        }
        self.tape.push_back(trade.clone());

        self.pending_trades.push(trade.clone());
        if self.pending_trades.len() >= cfg.storage.cold_batch_cap {
            let trades = std::mem::take(&mut self.pending_trades);
            self.cold.submit(ColdRecord::Trades {
                instrument: self.instrument.to_string(),
                trades,
            });
        }

        if let Some(bar) = self.ohlcv.on_trade(trade) {
            self.completed_bars.push(bar);
        }
    }

    pub fn tape_len(&self) -> usize {
        self.tape.len()
    }

    pub fn recent_trades(&self, n: usize) -> Vec<Trade> {
        self.tape.iter().rev().take(n).rev().cloned().collect()
    }

    // ---- warm tier ----

    pub fn get_position(&mut self) -> Option<Position> {
        let res = self.warm.get_position(&self.instrument);
        match res {
            Ok(position) => {
                self.warm_ok();
                self.cache.position = position.clone();
                position
            }
            Err(err) => {
                self.warm_err("get_position", &err);
                self.cache.position.clone()
            }
        }
    }

    pub fn set_position(&mut self, position: &Position) {
        self.cache.position = Some(position.clone());
        let res = self.warm.set_position(position);
        match res {
            Ok(()) => self.warm_ok(),
            Err(err) => self.warm_err("set_position", &err),
        }
    }

    pub fn get_balance(&mut self, ccy: &str) -> Option<f64> {
        let res = self.warm.get_balance(ccy);
        match res {
            Ok(balance) => {
                self.warm_ok();
                if let Some(b) = balance {
                    self.cache.balances.insert(ccy.to_string(), b);
                }
                balance
            }
            Err(err) => {
                self.warm_err("get_balance", &err);
                self.cache.balances.get(ccy).copied()
            }
        }
    }

    pub fn set_balance(&mut self, ccy: &str, value: f64) {
        self.cache.balances.insert(ccy.to_string(), value);
        let res = self.warm.set_balance(ccy, value);
        match res {
            Ok(()) => self.warm_ok(),
            Err(err) => self.warm_err("set_balance", &err),
        }
    }

    pub fn get_switch(&mut self, name: &str) -> Option<bool> {
        let res = self.warm.get_switch(name);
        match res {
            Ok(switch) => {
                self.warm_ok();
                if let Some(s) = switch {
                    self.cache.switches.insert(name.to_string(), s);
                }
                switch
            }
            Err(err) => {
                self.warm_err("get_switch", &err);
                self.cache.switches.get(name).copied()
            }
        }
    }

    pub fn set_switch(&mut self, name: &str, enabled: bool) {
        self.cache.switches.insert(name.to_string(), enabled);
        let res = self.warm.set_switch(name, enabled);
        match res {
            Ok(()) => self.warm_ok(),
            Err(err) => self.warm_err("set_switch", &err),
        }
    }

    pub fn get_risk_param(&mut self, name: &str) -> Option<f64> {
        let res = self.warm.get_risk_param(name);
        match res {
            Ok(param) => {
                self.warm_ok();
                if let Some(p) = param {
                    self.cache.risk_params.insert(name.to_string(), p);
                }
                param
            }
            Err(err) => {
                self.warm_err("get_risk_param", &err);
                self.cache.risk_params.get(name).copied()
            }
        }
    }

    pub fn set_risk_param(&mut self, name: &str, value: f64) {
        self.cache.risk_params.insert(name.to_string(), value);
        let res = self.warm.set_risk_param(name, value);
        match res {
            Ok(()) => self.warm_ok(),
            Err(err) => self.warm_err("set_risk_param", &err),
        }
    }

    /// Shared daily PnL accumulator. During an outage the cached total
    /// keeps accumulating locally so the circuit breaker still sees
    /// losses.
    pub fn incr_daily_pnl(&mut self, delta: f64) -> f64 {
        let res = self.warm.incr_daily_pnl(delta);
        match res {
            Ok(total) => {
                self.warm_ok();
                self.cache.daily_pnl = total;
                total
            }
            Err(err) => {
                self.warm_err("incr_daily_pnl", &err);
                self.cache.daily_pnl += delta;
                self.cache.daily_pnl
            }
        }
    }

    pub fn reset_daily_pnl(&mut self) {
        self.cache.daily_pnl = 0.0;
        self.set_risk_param("daily_pnl", 0.0);
    }

    /// Locks are the one warm operation that does not degrade: mutating
    /// shared state without the lock is worse than skipping the write.
    pub fn acquire_lock(
        &mut self,
        name: &str,
        timeout_ms: i64,
        now_ms: TimestampMs,
    ) -> Result<LockToken, WarmStoreError> {
        self.warm.acquire_lock(name, timeout_ms, now_ms)
    }

    pub fn release_lock(&mut self, name: &str, token: LockToken) -> Result<bool, WarmStoreError> {
        self.warm.release_lock(name, token)
    }

    // ---- cold tier ----

    /// Ship the pending archives when the cadence is due. Returns true
    /// when a flush happened.
    pub fn maybe_flush(
        &mut self,
        book: &OrderBookEngine,
        now_ms: TimestampMs,
        cfg: &Config,
    ) -> bool {
        if !self.flush.due(now_ms) {
            return false;
        }
        self.flush_archives(book, now_ms, cfg, false);
        self.flush.mark_ran(now_ms);
        true
    }

    /// End-of-session flush, includes the open OHLCV bar.
    pub fn final_flush(&mut self, book: &OrderBookEngine, now_ms: TimestampMs, cfg: &Config) {
        self.flush_archives(book, now_ms, cfg, true);
    }

    fn flush_archives(
        &mut self,
        book: &OrderBookEngine,
        now_ms: TimestampMs,
        cfg: &Config,
        include_open_bar: bool,
    ) {
        let snap = book.snapshot(cfg.storage.snapshot_depth);
        if !snap.bids.is_empty() || !snap.asks.is_empty() {
            self.cold.submit(ColdRecord::Snapshot(BookArchive {
                instrument: self.instrument.to_string(),
                timestamp_ms: now_ms,
                bids: snap.bids,
                asks: snap.asks,
            }));
        }

        if !self.pending_trades.is_empty() {
            let trades = std::mem::take(&mut self.pending_trades);
            self.cold.submit(ColdRecord::Trades {
                instrument: self.instrument.to_string(),
                trades,
            });
        }

        if include_open_bar {
            if let Some(bar) = self.ohlcv.take_open_bar() {
                self.completed_bars.push(bar);
            }
        }
        if !self.completed_bars.is_empty() {
            let bars = std::mem::take(&mut self.completed_bars);
            self.cold.submit(ColdRecord::Ohlcv {
                instrument: self.instrument.to_string(),
                bars,
            });
        }
        self.cold.flush();
    }

    fn warm_ok(&mut self) {
        if self.warm_degraded {
            self.warm_degraded = false;
            eprintln!("WARM_STORE_RECOVERED instrument={}", self.instrument);
        }
    }

    fn warm_err(&mut self, op: &str, err: &WarmStoreError) {
        if !self.warm_degraded {
            self.warm_degraded = true;
            eprintln!(
                "WARM_STORE_DEGRADED instrument={} op={op} err={err:?} serving=cache",
                self.instrument
            );
        }
    }
}
