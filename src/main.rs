// src/main.rs
//
// CLI entrypoint: runs the decision pipeline against the deterministic
// synthetic feed.
//
// - Deterministic runs via --seed (feed stream and fill noise).
// - Tick count, optional instrument override, verbosity.
// - Prints a concise run header (cfg version/hash, ticks, seed) and an
//   end-of-run summary.
// - Approved signals are auto-filled so position and PnL accounting are
//   exercised without an execution venue.

use clap::{ArgAction, Parser};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use perlustra::config::Config;
use perlustra::engine::Engine;
use perlustra::sim_feed::SimFeed;
use perlustra::telemetry::{TelemetryBuilder, TelemetryInputs, TelemetrySink};
use perlustra::types::{ExecutionEvent, FillNotice, TimestampMs};
use perlustra::warm_store::MemoryWarmStore;

// 2024-01-01T00:00:00Z. Gives the cold tier real-looking date partitions.
const BASE_MS: TimestampMs = 1_704_067_200_000;
const TICK_INTERVAL_MS: TimestampMs = 100;

#[derive(Debug, Parser)]
#[command(
    name = "perlustra",
    about = "Order-book decision pipeline over a synthetic feed",
    version
)]
struct Args {
    /// Number of synthetic feed messages to process.
    #[arg(long, default_value_t = 2000)]
    ticks: u64,

    /// Deterministic seed for the feed stream and fill noise.
    #[arg(long)]
    seed: Option<u64>,

    /// Instrument symbol override (default from config/env).
    #[arg(long)]
    instrument: Option<String>,

    /// Verbosity: -v per-signal lines, -vv per-tick lines.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn fnv1a64(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn main() {
    let args = Args::parse();

    let mut cfg = Config::from_env();
    if let Some(symbol) = &args.instrument {
        cfg.instrument = symbol.as_str().into();
    }
    let cfg_hash = fnv1a64(&format!("{cfg:?}"));
    let seed = args.seed.unwrap_or(0);

    println!(
        "perlustra | cfg={} | cfg_hash=0x{:016x} | instrument={} | ticks={} | seed={}",
        cfg.version, cfg_hash, cfg.instrument, args.ticks, seed
    );

    let mut telemetry = TelemetrySink::from_env();
    let mut records = TelemetryBuilder::new();

    let warm = MemoryWarmStore::new();
    let engine = Engine::new(&cfg);
    let start_ms = BASE_MS + (seed % 10_000) as i64;
    let mut state = engine.init_state(Box::new(warm), start_ms);

    let mut feed = SimFeed::new(&cfg, seed);
    // Independent stream so fill noise does not perturb the feed.
    let mut fill_rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));

    let mut emitted_total = 0usize;
    let mut approved_total = 0usize;
    let mut rejected_total = 0usize;
    let mut fills_total = 0usize;
    let mut last_date = perlustra::types::utc_date(start_ms);

    for t in 0..args.ticks {
        let now_ms = start_ms + (t as i64) * TICK_INTERVAL_MS;

        let today = perlustra::types::utc_date(now_ms);
        if today > last_date {
            engine.roll_day(&mut state, now_ms);
            last_date = today;
        }

        let msg = if t == 0 {
            feed.initial_snapshot(now_ms)
        } else {
            feed.next_message(now_ms)
        };
        let outcome = engine.process_message(&mut state, &msg, now_ms);

        if outcome.resync_requested {
            feed.request_snapshot();
        }

        emitted_total += outcome.emitted.len();
        approved_total += outcome.approved.len();
        rejected_total += outcome.rejected.len();

        // Auto-fill approved signals at the quoted (or current mid) price
        // with small execution-pnl noise.
        for signal in &outcome.approved {
            let price = signal.price.unwrap_or_else(|| feed.mid());
            let pnl_delta = fill_rng.gen_range(-0.05..0.05) * signal.size * price;
            let fill = ExecutionEvent::Fill(FillNotice {
                strategy: signal.strategy,
                side: signal.side,
                price,
                size: signal.size,
                pnl_delta,
                timestamp_ms: now_ms,
            });
            engine.on_execution_event(&mut state, &fill, now_ms);
            fills_total += 1;
            if args.verbose >= 1 {
                println!(
                    "t={t} fill {:?} {} {:.4} @ {:.1} pnl_delta={:+.2}",
                    signal.strategy,
                    signal.side.as_str(),
                    signal.size,
                    price,
                    pnl_delta
                );
            }
        }

        if args.verbose >= 1 {
            for (signal, reason) in &outcome.rejected {
                println!(
                    "t={t} rejected {:?} {}: {:?}",
                    signal.strategy,
                    signal.side.as_str(),
                    reason
                );
            }
        }
        if args.verbose >= 2 {
            println!(
                "t={t} status={:?} mid={:?} ofi={:.2} emitted={} approved={}",
                outcome.book_status,
                outcome.frame.mid,
                outcome.frame.ofi,
                outcome.emitted.len(),
                outcome.approved.len()
            );
        }

        let record = records.build_record(TelemetryInputs {
            instrument: &cfg.instrument,
            outcome: &outcome,
            risk: &state.risk,
            storage: &state.storage,
            now_ms,
        });
        telemetry.log_json(&record);
    }

    let end_ms = start_ms + (args.ticks as i64) * TICK_INTERVAL_MS;
    engine.shutdown(&mut state, end_ms);
    telemetry.flush();

    let risk_state = state.risk.state();
    println!(
        "done | ticks={} | emitted={} | approved={} | rejected={} | fills={}",
        args.ticks, emitted_total, approved_total, rejected_total, fills_total
    );
    println!(
        "pnl_realized={:.2} | pnl_unrealized={:.2} | halted={} | book={:?} | tape_len={}",
        risk_state.daily_realized_pnl,
        risk_state.daily_unrealized_pnl,
        risk_state.halted,
        state.book.status(),
        state.storage.tape_len()
    );
    telemetry.log_json(&json!({
        "schema_version": 1,
        "event_type": "run_summary",
        "ticks": args.ticks,
        "emitted": emitted_total,
        "approved": approved_total,
        "rejected": rejected_total,
        "fills": fills_total,
        "pnl_realized": risk_state.daily_realized_pnl,
        "halted": risk_state.halted,
    }));
}
