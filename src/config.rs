// src/config.rs
//
// Central configuration for the decision pipeline. Single source of truth
// for book, feature, strategy, risk, and storage parameters. Defaults are
// built from the named consts below; environment variables override on top
// (CLI > env > default, resolved in main).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

// Risk surface defaults. Env names for these mirror the deployment
// conventions (`MAX_POSITION_SIZE` etc., no prefix).
pub const MAX_POSITION_SIZE: f64 = 1_000.0;
pub const MAX_DAILY_LOSS_FRAC: f64 = 0.05;
pub const MAX_LATENCY_MS: f64 = 100.0;
pub const STARTING_EQUITY: f64 = 10_000.0;

pub const BOOK_MAX_LEVELS: usize = 400;
pub const CHECKSUM_LEVELS: usize = 25;
pub const OFI_HISTORY_CAP: usize = 100;
pub const TRADE_TAPE_CAP: usize = 1_000;
pub const COLD_FLUSH_INTERVAL_MS: i64 = 60_000;

pub const DEFAULT_INSTRUMENT: &str = "BTC-USDT-SWAP";

/// Order-book mirror parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BookConfig {
    /// Levels retained per side; the worst levels are trimmed after each
    /// delta batch.
    pub max_levels_per_side: usize,
    /// Levels per side entering the feed checksum.
    pub checksum_levels: usize,
    /// Price match tolerance for upsert/remove.
    pub price_epsilon: f64,
    /// Levels per side copied into the per-tick view handed to features
    /// and strategies.
    pub view_depth: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            max_levels_per_side: BOOK_MAX_LEVELS,
            checksum_levels: CHECKSUM_LEVELS,
            price_epsilon: 1e-9,
            view_depth: 20,
        }
    }
}

/// Microstructure feature windows and thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    /// OFI sample history capacity (hot tier bound).
    pub ofi_history_cap: usize,
    /// Default trailing window for OFI queries.
    pub ofi_window: usize,
    /// Samples entering the OFI trend slope fit.
    pub trend_window: usize,
    /// |slope| at or below this classifies as stable.
    pub trend_slope_threshold: f64,
    /// Trailing interval for best-depth vacuum detection.
    pub vacuum_interval_ms: i64,
    /// Depth-drop fraction that counts as a vacuum.
    pub vacuum_threshold: f64,
    /// EWMA smoothing factor for the buy/sell pressure ratio.
    pub pressure_alpha: f64,
    /// Levels per side summed for the pressure depth window.
    pub pressure_depth_levels: usize,
    /// Levels per side entering weighted market pressure.
    pub wmp_levels: usize,
    /// Scaling constant applied to the depth imbalance in WMP.
    pub wmp_k: f64,
    /// Ticks in the rolling average spread window.
    pub spread_window: usize,
    /// Minimum samples before the average spread is defined.
    pub spread_min_history: usize,
    /// Spread classification in bps of mid.
    pub wide_spread_bps: f64,
    pub extreme_spread_bps: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            ofi_history_cap: OFI_HISTORY_CAP,
            ofi_window: 20,
            trend_window: 10,
            trend_slope_threshold: 0.01,
            vacuum_interval_ms: 500,
            vacuum_threshold: 0.5,
            pressure_alpha: 0.2,
            pressure_depth_levels: 5,
            wmp_levels: 5,
            wmp_k: 1.0,
            spread_window: 50,
            spread_min_history: 10,
            wide_spread_bps: 20.0,
            extreme_spread_bps: 50.0,
        }
    }
}

/// Front-running strategy parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontRunConfig {
    pub enabled: bool,
    /// Minimum vacuum magnitude (depth-drop fraction) to arm.
    pub min_vacuum_magnitude: f64,
    /// Confirming trade must arrive within this after arming.
    pub confirm_timeout_ms: i64,
    /// Minimum aggressor size that counts as confirmation.
    pub confirm_min_size: f64,
    pub entry_size: f64,
    /// Favorable mid move (fraction of entry mid) that triggers exit.
    pub profit_target_frac: f64,
    /// Maximum holding duration before a forced exit.
    pub max_hold_ms: i64,
}

impl Default for FrontRunConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_vacuum_magnitude: 0.5,
            confirm_timeout_ms: 2_000,
            confirm_min_size: 10.0,
            entry_size: 0.01,
            profit_target_frac: 0.002,
            max_hold_ms: 30_000,
        }
    }
}

/// Wall-riding strategy parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WallRideConfig {
    pub enabled: bool,
    /// Level size must exceed this multiple of the average level size.
    pub wall_multiple: f64,
    /// Absolute size floor for a wall.
    pub min_wall_size: f64,
    /// Wall must persist this long before it is ridable.
    pub persist_ms: i64,
    /// Wall unseen for this long counts as removed.
    pub gone_ms: i64,
    pub ride_size: f64,
    /// Price improvement fraction applied ahead of the wall.
    pub price_improvement: f64,
}

impl Default for WallRideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wall_multiple: 8.0,
            min_wall_size: 100.0,
            persist_ms: 5_000,
            gone_ms: 2_000,
            ride_size: 0.01,
            price_improvement: 0.001,
        }
    }
}

/// Spread-capturing strategy parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadCaptureConfig {
    pub enabled: bool,
    /// Spread must exceed this multiple of the rolling average spread.
    pub widen_multiple: f64,
    pub capture_size: f64,
    /// Maximum holding duration before the position is closed out.
    pub max_hold_ms: i64,
}

impl Default for SpreadCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            widen_multiple: 3.0,
            capture_size: 0.01,
            max_hold_ms: 60_000,
        }
    }
}

/// Circuit-breaker limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    /// Absolute position size cap (base units).
    pub max_position_size: f64,
    /// Daily loss limit as a fraction of starting equity.
    pub max_daily_loss: f64,
    /// Rolling mean latency limit.
    pub max_latency_ms: f64,
    /// Equity at day start; the loss fraction denominator.
    pub starting_equity: f64,
    /// Latency samples in the rolling window.
    pub latency_window: usize,
    /// Timeout for the warm-tier distributed lock.
    pub lock_timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: MAX_POSITION_SIZE,
            max_daily_loss: MAX_DAILY_LOSS_FRAC,
            max_latency_ms: MAX_LATENCY_MS,
            starting_equity: STARTING_EQUITY,
            latency_window: 100,
            lock_timeout_ms: 1_000,
        }
    }
}

/// Tiered storage parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Hot trade tape capacity (FIFO).
    pub trade_tape_cap: usize,
    /// Cold flush cadence.
    pub cold_flush_interval_ms: i64,
    /// Records per cold write batch.
    pub cold_batch_cap: usize,
    /// Directory for cold-tier files.
    pub cold_dir: PathBuf,
    /// Book levels per side archived on each flush.
    pub snapshot_depth: usize,
    /// OHLCV bar width.
    pub ohlcv_bar_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            trade_tape_cap: TRADE_TAPE_CAP,
            cold_flush_interval_ms: COLD_FLUSH_INTERVAL_MS,
            cold_batch_cap: 100,
            cold_dir: PathBuf::from("cold"),
            snapshot_depth: 10,
            ohlcv_bar_ms: 60_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub version: String,
    pub instrument: Arc<str>,
    pub book: BookConfig,
    pub features: FeatureConfig,
    pub front_run: FrontRunConfig,
    pub wall_ride: WallRideConfig,
    pub spread_capture: SpreadCaptureConfig,
    pub risk: RiskConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            instrument: Arc::from(DEFAULT_INSTRUMENT),
            book: BookConfig::default(),
            features: FeatureConfig::default(),
            front_run: FrontRunConfig::default(),
            wall_ride: WallRideConfig::default(),
            spread_capture: SpreadCaptureConfig::default(),
            risk: RiskConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Apply environment overrides onto the current values. Unparseable
    /// values are ignored, not errors.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_str("PERLUSTRA_INSTRUMENT") {
            self.instrument = Arc::from(v.as_str());
        }
        if let Some(v) = env_f64("MAX_POSITION_SIZE") {
            self.risk.max_position_size = v;
        }
        if let Some(v) = env_f64("MAX_DAILY_LOSS") {
            self.risk.max_daily_loss = v;
        }
        if let Some(v) = env_f64("MAX_LATENCY_MS") {
            self.risk.max_latency_ms = v;
        }
        if let Some(v) = env_f64("STARTING_EQUITY") {
            self.risk.starting_equity = v;
        }
        if let Some(v) = env_bool("ENABLE_FRONT_RUN") {
            self.front_run.enabled = v;
        }
        if let Some(v) = env_bool("ENABLE_WALL_RIDE") {
            self.wall_ride.enabled = v;
        }
        if let Some(v) = env_bool("ENABLE_SPREAD_CAPTURE") {
            self.spread_capture.enabled = v;
        }
        if let Some(v) = env_f64("VACUUM_THRESHOLD") {
            self.features.vacuum_threshold = v;
            self.front_run.min_vacuum_magnitude = v;
        }
        if let Some(v) = env_f64("WALL_MULTIPLE") {
            self.wall_ride.wall_multiple = v;
        }
        if let Some(v) = env_f64("SPREAD_WIDEN_MULTIPLE") {
            self.spread_capture.widen_multiple = v;
        }
        if let Some(v) = env_usize("OFI_WINDOW") {
            self.features.ofi_window = v;
        }
        if let Some(v) = env_str("PERLUSTRA_COLD_DIR") {
            self.storage.cold_dir = PathBuf::from(v);
        }
        if let Some(v) = env_i64("PERLUSTRA_FLUSH_INTERVAL_MS") {
            self.storage.cold_flush_interval_ms = v.max(1);
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|s| s.trim().parse::<f64>().ok())
}

fn env_i64(name: &str) -> Option<i64> {
    env::var(name).ok().and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
