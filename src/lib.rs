//! Perlustra core library.
//!
//! A single-instrument market-data decision pipeline: mirror the venue's
//! depth feed, derive microstructure features, run tactical strategy
//! machines over them, and gate every signal through risk before it can
//! reach execution. The binary (`src/main.rs`) is a thin simulation
//! harness around these components.
//!
//! # Architecture
//!
//! Data flows one way through the pipeline, one feed message at a time:
//!
//! - **Order book** (`orderbook`): deterministic L2 mirror with checksum,
//!   sequence, and crossed-book integrity checking. Failures latch the
//!   book `Stale` rather than killing it.
//!
//! - **Features** (`features`): order-flow imbalance, weighted mid,
//!   buy/sell pressure, spread statistics, and liquidity-vacuum
//!   detection, updated incrementally from deltas and trades.
//!
//! - **Strategies** (`front_run`, `wall_ride`, `spread_capture` behind
//!   `strategy_core`): three independent state machines that emit
//!   advisory signals. At most one transition per machine per message.
//!
//! - **Risk** (`risk`): the final gate. Fixed check order, a sticky
//!   circuit breaker, and daily rollover accounting.
//!
//! - **Storage** (`storage`, `warm_store`, `cold_store`): hot in-process
//!   state, a shared warm tier that degrades to cache when unreachable,
//!   and an append-only cold tier on a background writer thread.
//!
//! `engine::Engine` wires these together; `sim_feed::SimFeed` drives
//! them with a deterministic synthetic stream.

pub mod cold_store;
pub mod config;
pub mod engine;
pub mod features;
pub mod front_run;
pub mod orderbook;
pub mod risk;
pub mod sim_feed;
pub mod spread_capture;
pub mod storage;
pub mod strategy_core;
pub mod telemetry;
pub mod types;
pub mod wall_ride;
pub mod warm_store;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::Config;
pub use engine::{Engine, PipelineState, TickOutcome};

pub use orderbook::{
    BookError, BookSnapshot, BookStatus, DeltaStats, OrderBookEngine, StaleReason,
};

pub use features::{
    FeatureEngine, FeatureFrame, SpreadBand, TrendDirection, VacuumEvent,
};

pub use front_run::{FrontRunPhase, FrontRunStrategy};
pub use spread_capture::{SpreadCapturePhase, SpreadCaptureStrategy};
pub use strategy_core::StrategyEngine;
pub use wall_ride::{WallRidePhase, WallRideStrategy};

pub use risk::{RejectReason, RiskManager, SignalDecision, TripReason};

pub use cold_store::{BookArchive, ColdRecord, ColdWriter};
pub use storage::TieredStorageCoordinator;
pub use warm_store::{MemoryWarmStore, WarmStore, WarmStoreError};

pub use sim_feed::SimFeed;
pub use telemetry::{TelemetryBuilder, TelemetryInputs, TelemetrySink};

pub use types::{
    BookDelta, BookSide, DepthEntry, ExecutionEvent, FeedMessage, FillNotice, OhlcvBar,
    Position, PriceLevel, Side, StrategyId, StrategySignal, TimestampMs, Trade,
};

// --- Position accounting unit tests ----------------------------------------
