// src/warm_store.rs
//
// Warm-tier state behind a trait so the pipeline does not care whether
// it talks to an in-process map or an external store. Values are JSON
// strings under composed keys (`balance:{ccy}`, `position:{instrument}`,
// `risk:{name}`, `switch:{name}`), matching the deployed key scheme.
//
// Every operation can fail with `Unavailable`; callers degrade to their
// cache and keep trading. Locks carry an expiry stamp so a crashed
// holder cannot wedge the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{Position, TimestampMs};

/// Held locks expire after this long regardless of the holder.
pub const LOCK_TTL_MS: i64 = 5_000;

const LOCK_POLL_MS: u64 = 5;

pub type LockToken = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarmStoreError {
    Unavailable,
    LockTimeout { name: String, timeout_ms: i64 },
}

pub fn balance_key(ccy: &str) -> String {
    format!("balance:{ccy}")
}

pub fn position_key(instrument: &str) -> String {
    format!("position:{instrument}")
}

pub fn risk_key(name: &str) -> String {
    format!("risk:{name}")
}

pub fn switch_key(name: &str) -> String {
    format!("switch:{name}")
}

pub trait WarmStore: Send {
    fn get_balance(&self, ccy: &str) -> Result<Option<f64>, WarmStoreError>;
    fn set_balance(&self, ccy: &str, value: f64) -> Result<(), WarmStoreError>;
    fn get_position(&self, instrument: &str) -> Result<Option<Position>, WarmStoreError>;
    fn set_position(&self, position: &Position) -> Result<(), WarmStoreError>;
    fn get_risk_param(&self, name: &str) -> Result<Option<f64>, WarmStoreError>;
    fn set_risk_param(&self, name: &str, value: f64) -> Result<(), WarmStoreError>;
    fn get_switch(&self, name: &str) -> Result<Option<bool>, WarmStoreError>;
    fn set_switch(&self, name: &str, enabled: bool) -> Result<(), WarmStoreError>;
    /// Add to the shared daily PnL accumulator, returning the new total.
    fn incr_daily_pnl(&self, delta: f64) -> Result<f64, WarmStoreError>;
    fn acquire_lock(
        &self,
        name: &str,
        timeout_ms: i64,
        now_ms: TimestampMs,
    ) -> Result<LockToken, WarmStoreError>;
    /// Returns `true` when the token still owned the lock.
    fn release_lock(&self, name: &str, token: LockToken) -> Result<bool, WarmStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LockState {
    token: LockToken,
    expires_ms: TimestampMs,
}

#[derive(Debug)]
struct WarmInner {
    available: bool,
    kv: HashMap<String, String>,
    locks: HashMap<String, LockState>,
    next_token: LockToken,
}

/// In-process warm store. Cloning shares the underlying state, so one
/// instance can stand in for a shared external store across components.
#[derive(Debug, Clone)]
pub struct MemoryWarmStore {
    inner: Arc<Mutex<WarmInner>>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WarmInner {
                available: true,
                kv: HashMap::new(),
                locks: HashMap::new(),
                next_token: 0,
            })),
        }
    }

    /// Simulate an outage (or recovery) of the backing store.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    fn lock(&self) -> MutexGuard<'_, WarmInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<Option<T>, WarmStoreError> {
        let inner = self.lock();
        if !inner.available {
            return Err(WarmStoreError::Unavailable);
        }
        Ok(inner
            .kv
            .get(key)
            .and_then(|raw| serde_json::from_str(raw).ok()))
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), WarmStoreError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(WarmStoreError::Unavailable);
        }
        if let Ok(raw) = serde_json::to_string(value) {
            inner.kv.insert(key.to_string(), raw);
        }
        Ok(())
    }
}

impl Default for MemoryWarmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmStore for MemoryWarmStore {
    fn get_balance(&self, ccy: &str) -> Result<Option<f64>, WarmStoreError> {
        self.get_json(&balance_key(ccy))
    }

    fn set_balance(&self, ccy: &str, value: f64) -> Result<(), WarmStoreError> {
        self.set_json(&balance_key(ccy), &value)
    }

    fn get_position(&self, instrument: &str) -> Result<Option<Position>, WarmStoreError> {
        self.get_json(&position_key(instrument))
    }

    fn set_position(&self, position: &Position) -> Result<(), WarmStoreError> {
        self.set_json(&position_key(&position.instrument), position)
    }

    fn get_risk_param(&self, name: &str) -> Result<Option<f64>, WarmStoreError> {
        self.get_json(&risk_key(name))
    }

    fn set_risk_param(&self, name: &str, value: f64) -> Result<(), WarmStoreError> {
        self.set_json(&risk_key(name), &value)
    }

    fn get_switch(&self, name: &str) -> Result<Option<bool>, WarmStoreError> {
        self.get_json(&switch_key(name))
    }

    fn set_switch(&self, name: &str, enabled: bool) -> Result<(), WarmStoreError> {
        self.set_json(&switch_key(name), &enabled)
    }

    fn incr_daily_pnl(&self, delta: f64) -> Result<f64, WarmStoreError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(WarmStoreError::Unavailable);
        }
        let key = risk_key("daily_pnl");
        let current = inner
            .kv
            .get(&key)
            .and_then(|raw| serde_json::from_str::<f64>(raw).ok())
            .unwrap_or(0.0);
        let next = current + delta;
        if let Ok(raw) = serde_json::to_string(&next) {
            inner.kv.insert(key, raw);
        }
        Ok(next)
    }

    fn acquire_lock(
        &self,
        name: &str,
        timeout_ms: i64,
        now_ms: TimestampMs,
    ) -> Result<LockToken, WarmStoreError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        loop {
            {
                let mut inner = self.lock();
                if !inner.available {
                    return Err(WarmStoreError::Unavailable);
                }
                let held = inner
                    .locks
                    .get(name)
                    .is_some_and(|state| state.expires_ms > now_ms);
                if !held {
                    inner.next_token += 1;
                    let token = inner.next_token;
                    inner.locks.insert(
                        name.to_string(),
                        LockState {
                            token,
                            expires_ms: now_ms + LOCK_TTL_MS,
                        },
                    );
                    return Ok(token);
                }
            }
            if Instant::now() >= deadline {
                return Err(WarmStoreError::LockTimeout {
                    name: name.to_string(),
                    timeout_ms,
                });
            }
            thread::sleep(Duration::from_millis(LOCK_POLL_MS));
        }
    }

    fn release_lock(&self, name: &str, token: LockToken) -> Result<bool, WarmStoreError> {
        let mut inner = self.lock();
        if !inner.available {
            return Err(WarmStoreError::Unavailable);
        }
        match inner.locks.get(name) {
            Some(state) if state.token == token => {
                inner.locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
