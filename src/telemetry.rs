// src/telemetry.rs
//
// JSONL telemetry for the pipeline. One JSON object per processed
// message, plus one-shot transition events (stale latch, breaker trip,
// warm degradation) derived by diffing against the previous record.
//
// Controlled entirely by environment variables so runs can turn
// telemetry on without code changes:
//
//   PERLUSTRA_TELEMETRY_MODE    "off" (default) or "jsonl"
//   PERLUSTRA_TELEMETRY_PATH    output path, required when mode is "jsonl"
//   PERLUSTRA_TELEMETRY_APPEND  "1"/"true"/"yes" appends instead of truncating
//
// The sink never propagates errors into the pipeline: a failed open or
// write disables telemetry for the rest of the process.
//
// Records carry `schema_version: 1`. The sink does not inject it;
// producers call `ensure_schema_v1` on anything they assemble by hand.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde_json::{self, json, Value as JsonValue};

use crate::engine::TickOutcome;
use crate::risk::RiskManager;
use crate::storage::TieredStorageCoordinator;
use crate::types::{StrategySignal, TimestampMs};

/// Current telemetry schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Insert `schema_version: 1` into a record that lacks it. Existing
/// values are left alone.
pub fn ensure_schema_v1(record: &mut JsonValue) {
    match record {
        JsonValue::Object(map) => {
            map.entry("schema_version")
                .or_insert_with(|| JsonValue::Number(SCHEMA_VERSION.into()));
        }
        _ => {
            debug_assert!(
                false,
                "telemetry records should be JSON objects, got {:?}",
                record
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    Off,
    Jsonl,
}

impl TelemetryMode {
    /// Parse mode from the environment. Unknown values read as Off.
    pub fn from_env() -> Self {
        match env::var("PERLUSTRA_TELEMETRY_MODE") {
            Ok(s) => match s.to_lowercase().as_str() {
                "jsonl" => TelemetryMode::Jsonl,
                _ => TelemetryMode::Off,
            },
            Err(_) => TelemetryMode::Off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub path: Option<PathBuf>,
    pub append: bool,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let mode = TelemetryMode::from_env();
        let path = if mode == TelemetryMode::Jsonl {
            env::var("PERLUSTRA_TELEMETRY_PATH").ok().map(PathBuf::from)
        } else {
            None
        };
        TelemetryConfig {
            mode,
            path,
            append: Self::append_from_env(),
        }
    }

    pub fn append_from_env() -> bool {
        env::var("PERLUSTRA_TELEMETRY_APPEND")
            .ok()
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// A JSONL sink. Off-mode methods are no-ops; Jsonl mode lazily opens
/// the configured path on first write.
pub struct TelemetrySink {
    mode: TelemetryMode,
    path: Option<PathBuf>,
    append: bool,
    writer: Option<BufWriter<File>>,
}

impl TelemetrySink {
    /// Build from environment configuration. Never fails; invalid
    /// configuration falls back to Off.
    pub fn from_env() -> Self {
        Self::from_config(TelemetryConfig::from_env())
    }

    pub fn from_config(cfg: TelemetryConfig) -> Self {
        TelemetrySink {
            mode: cfg.mode,
            path: cfg.path,
            append: cfg.append,
            writer: None,
        }
    }

    fn ensure_writer(&mut self) -> Option<&mut BufWriter<File>> {
        if self.mode != TelemetryMode::Jsonl {
            return None;
        }

        if self.writer.is_none() {
            let path = match &self.path {
                Some(p) => p.clone(),
                None => {
                    // Jsonl mode without a path. Disable.
                    self.mode = TelemetryMode::Off;
                    return None;
                }
            };

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            let mut options = OpenOptions::new();
            options.create(true).write(true);
            if self.append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            let file = match options.open(&path) {
                Ok(f) => f,
                Err(_) => {
                    self.mode = TelemetryMode::Off;
                    return None;
                }
            };

            self.writer = Some(BufWriter::new(file));
        }

        self.writer.as_mut()
    }

    /// Log a JSON value as one line. Write errors disable the sink for
    /// the remainder of the process rather than propagating.
    pub fn log_json(&mut self, value: &JsonValue) {
        if self.mode != TelemetryMode::Jsonl {
            return;
        }

        let writer = match self.ensure_writer() {
            Some(w) => w,
            None => return,
        };

        let line = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(_) => return,
        };

        if writeln!(writer, "{}", line).is_err() {
            self.mode = TelemetryMode::Off;
            self.writer = None;
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Everything one tick record is assembled from.
pub struct TelemetryInputs<'a> {
    pub instrument: &'a str,
    pub outcome: &'a TickOutcome,
    pub risk: &'a RiskManager,
    pub storage: &'a TieredStorageCoordinator,
    pub now_ms: TimestampMs,
}

/// Builds per-tick records and edge-triggered transition events.
/// Tracks the previous tick's latches so each transition is reported
/// exactly once.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBuilder {
    prev_stale: bool,
    prev_halted: bool,
    prev_degraded: bool,
}

impl TelemetryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_record(&mut self, input: TelemetryInputs<'_>) -> JsonValue {
        let outcome = input.outcome;
        let frame = &outcome.frame;
        let risk_state = input.risk.state();

        let stale = outcome.book_status.is_stale();
        let halted = risk_state.halted;
        let degraded = input.storage.warm_degraded();

        let rejected: Vec<JsonValue> = outcome
            .rejected
            .iter()
            .map(|(signal, reason)| {
                let mut rec = signal_to_json(signal);
                if let Some(map) = rec.as_object_mut() {
                    map.insert(
                        "reason".to_string(),
                        serde_json::to_value(reason).unwrap_or_default(),
                    );
                }
                rec
            })
            .collect();

        let mut record = json!({
            "schema_version": SCHEMA_VERSION,
            "t": outcome.tick,
            "timestamp_ms": input.now_ms,
            "instrument": input.instrument,
            "book_status": format!("{:?}", outcome.book_status),
            "resync_requested": outcome.resync_requested,
            "mid": frame.mid,
            "spread": frame.spread,
            "avg_spread": frame.avg_spread,
            "spread_band": frame.spread_band.map(|b| format!("{b:?}")),
            "ofi": frame.ofi,
            "ofi_trend": format!("{:?}", frame.ofi_trend),
            "weighted_mid": frame.weighted_mid,
            "pressure": frame.pressure,
            "bid_depth": frame.bid_depth,
            "ask_depth": frame.ask_depth,
            "vacuum": frame.vacuum.as_ref().map(|v| json!({
                "side": format!("{:?}", v.side),
                "magnitude": v.magnitude,
                "timestamp_ms": v.timestamp_ms,
            })),
            "signals_emitted": outcome.emitted.iter().map(signal_to_json).collect::<Vec<_>>(),
            "signals_approved": outcome.approved.iter().map(signal_to_json).collect::<Vec<_>>(),
            "signals_rejected": rejected,
            "pnl_realized": risk_state.daily_realized_pnl,
            "pnl_unrealized": risk_state.daily_unrealized_pnl,
            "pnl_total": input.risk.daily_pnl(),
            "halted": halted,
            "trip_reason": input.risk.trip_reason().map(|r| r.to_string()),
            "latency_mean_ms": input.risk.mean_latency(),
            "warm_degraded": degraded,
            "tape_len": input.storage.tape_len(),
            "flushed": outcome.flushed,
        });

        let events = self.build_events(input.now_ms, stale, halted, degraded, input.risk);
        if let Some(map) = record.as_object_mut() {
            map.insert("events".to_string(), JsonValue::Array(events));
        }

        self.prev_stale = stale;
        self.prev_halted = halted;
        self.prev_degraded = degraded;

        ensure_schema_v1(&mut record);
        record
    }

    fn build_events(
        &self,
        now_ms: TimestampMs,
        stale: bool,
        halted: bool,
        degraded: bool,
        risk: &RiskManager,
    ) -> Vec<JsonValue> {
        let mut events = Vec::new();
        if stale && !self.prev_stale {
            events.push(json!({
                "event_type": "book_stale",
                "timestamp_ms": now_ms,
            }));
        }
        if !stale && self.prev_stale {
            events.push(json!({
                "event_type": "book_recovered",
                "timestamp_ms": now_ms,
            }));
        }
        if halted && !self.prev_halted {
            events.push(json!({
                "event_type": "circuit_breaker_trip",
                "reason": risk.trip_reason().map(|r| r.to_string()),
                "timestamp_ms": now_ms,
            }));
        }
        if degraded && !self.prev_degraded {
            events.push(json!({
                "event_type": "warm_degraded",
                "timestamp_ms": now_ms,
            }));
        }
        if !degraded && self.prev_degraded {
            events.push(json!({
                "event_type": "warm_recovered",
                "timestamp_ms": now_ms,
            }));
        }
        events
    }
}

fn signal_to_json(signal: &StrategySignal) -> JsonValue {
    json!({
        "strategy": format!("{:?}", signal.strategy),
        "side": signal.side.as_str(),
        "price": signal.price,
        "size": signal.size,
        "confidence": signal.confidence,
        "note": signal.reason,
    })
}
