use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use sluice_store::error::StoreError;
use sluice_store::script::{ScriptKind, ScriptReply, ScriptStore};

/// Stored value: a scaled counter or token-bucket state.
#[derive(Debug, Clone, Copy)]
enum Value {
    Counter(i64),
    Bucket { tokens: i64, last_refill_ms: i64 },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

/// In-process [`ScriptStore`] with a controllable clock.
///
/// Runs the same integer kernels as the Redis Lua scripts against a single
/// map. One map-wide mutex stands in for the store's single-threaded script
/// execution; that is what keeps the multi-key sliding-window kernel atomic.
/// Entries are lazily evicted when their TTL has elapsed on the mock clock.
pub struct MemoryScriptStore {
    entries: Mutex<HashMap<String, Entry>>,
    now_ms: AtomicI64,
}

impl Default for MemoryScriptStore {
    fn default() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::with_now_ms(i64::try_from(now.as_millis()).unwrap_or(i64::MAX))
    }
}

impl MemoryScriptStore {
    /// Create a store whose clock starts at the real epoch time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose clock starts at the given epoch millisecond.
    #[must_use]
    pub fn with_now_ms(now_ms: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Set the clock to an absolute epoch millisecond.
    pub fn set_now_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Remaining TTL of a key in milliseconds. `None` when the key is
    /// missing, expired, or carries no expiry.
    pub fn ttl_ms(&self, key: &str) -> Option<i64> {
        let now = self.clock_ms();
        let entries = self.lock();
        let entry = entries.get(key)?;
        let expires_at = entry.expires_at_ms?;
        let ttl = expires_at - now;
        (ttl > 0).then_some(ttl)
    }

    fn clock_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryScriptStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryScriptStore")
            .field("now_ms", &self.clock_ms())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn run_script(
        &self,
        kind: ScriptKind,
        keys: &[String],
        argv: &[i64],
    ) -> Result<ScriptReply, StoreError> {
        let (limit, window, time_arg, cost) = argv4(argv)?;
        if window <= 0 {
            return Err(StoreError::Script(format!(
                "window must be positive, got {window}"
            )));
        }
        let store_now = self.clock_ms();
        let mut entries = self.lock();

        match kind {
            ScriptKind::FixedWindow => {
                let key = single_key(keys)?;
                fixed_window(&mut entries, key, limit, window, time_arg, cost, store_now)
            }
            ScriptKind::TokenBucket => {
                let key = single_key(keys)?;
                token_bucket(&mut entries, key, limit, window, time_arg, cost, store_now)
            }
            ScriptKind::SlidingWindow => {
                let [current, previous] = keys else {
                    return Err(StoreError::Script(format!(
                        "sliding window expects 2 keys, got {}",
                        keys.len()
                    )));
                };
                sliding_window(
                    &mut entries,
                    current,
                    previous,
                    limit,
                    window,
                    time_arg,
                    cost,
                    store_now,
                )
            }
        }
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock_ms();
        let mut entries = self.lock();
        evict_if_expired(&mut entries, key, now);
        match entries.get(key).map(|e| e.value) {
            None => Ok(None),
            Some(Value::Counter(value)) => Ok(Some(value)),
            Some(Value::Bucket { .. }) => Err(wrong_type()),
        }
    }

    async fn get_bucket(&self, key: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let now = self.clock_ms();
        let mut entries = self.lock();
        evict_if_expired(&mut entries, key, now);
        match entries.get(key).map(|e| e.value) {
            None => Ok(None),
            Some(Value::Bucket {
                tokens,
                last_refill_ms,
            }) => Ok(Some((tokens, last_refill_ms))),
            Some(Value::Counter(_)) => Err(wrong_type()),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock_ms();
        let mut entries = self.lock();
        let mut removed = 0;
        for key in keys {
            evict_if_expired(&mut entries, key, now);
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn now_ms(&self) -> Result<i64, StoreError> {
        Ok(self.clock_ms())
    }

    async fn close(&self) {}
}

fn argv4(argv: &[i64]) -> Result<(i64, i64, i64, i64), StoreError> {
    match argv {
        [a, b, c, d] => Ok((*a, *b, *c, *d)),
        _ => Err(StoreError::Script(format!(
            "expected 4 arguments, got {}",
            argv.len()
        ))),
    }
}

fn single_key(keys: &[String]) -> Result<&str, StoreError> {
    match keys {
        [key] => Ok(key),
        _ => Err(StoreError::Script(format!(
            "expected 1 key, got {}",
            keys.len()
        ))),
    }
}

fn wrong_type() -> StoreError {
    StoreError::Backend(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_owned(),
    )
}

fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now_ms: i64) {
    if let Some(entry) = entries.get(key)
        && entry.expires_at_ms.is_some_and(|at| at <= now_ms)
    {
        entries.remove(key);
    }
}

fn read_counter(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    now_ms: i64,
) -> Result<i64, StoreError> {
    evict_if_expired(entries, key, now_ms);
    match entries.get(key).map(|e| e.value) {
        None => Ok(0),
        Some(Value::Counter(value)) => Ok(value),
        Some(Value::Bucket { .. }) => Err(wrong_type()),
    }
}

fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

/// Mirror of the fixed-window Lua kernel.
fn fixed_window(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    limit: i64,
    window: i64,
    window_end: i64,
    cost: i64,
    store_now_ms: i64,
) -> Result<ScriptReply, StoreError> {
    evict_if_expired(entries, key, store_now_ms);
    let entry = entries.entry(key.to_owned()).or_insert(Entry {
        value: Value::Counter(0),
        expires_at_ms: None,
    });
    let Value::Counter(current) = &mut entry.value else {
        return Err(wrong_type());
    };
    *current = current.saturating_add(cost);
    let current = *current;

    if current == cost {
        entry.expires_at_ms = Some(window_end * 1000);
    }
    let ttl_ms = if let Some(at) = entry.expires_at_ms {
        at - store_now_ms
    } else {
        entry.expires_at_ms = Some(window_end * 1000);
        window * 1000
    };
    // Redis TTL reports whole seconds, rounded to the nearest.
    let ttl_secs = (ttl_ms + 500).div_euclid(1000);

    Ok(ScriptReply {
        allowed: current <= limit,
        remaining: (limit - current).max(0),
        retry_after_ms: (ttl_secs * 1000).max(0),
    })
}

/// Mirror of the token-bucket Lua kernel.
fn token_bucket(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    capacity: i64,
    window: i64,
    now_ms: i64,
    cost: i64,
    store_now_ms: i64,
) -> Result<ScriptReply, StoreError> {
    if capacity <= 0 {
        return Err(StoreError::Script(format!(
            "capacity must be positive, got {capacity}"
        )));
    }
    evict_if_expired(entries, key, store_now_ms);
    let window_ms = window * 1000;
    let ttl_ms = (2 * window + 60) * 1000;

    let (tokens, last_refill_ms) = match entries.get(key).map(|e| e.value) {
        None => (capacity, now_ms),
        Some(Value::Bucket {
            tokens,
            last_refill_ms,
        }) => (tokens, last_refill_ms),
        Some(Value::Counter(_)) => return Err(wrong_type()),
    };

    let elapsed_ms = (now_ms - last_refill_ms).max(0);
    let balance = tokens
        .saturating_add(capacity.saturating_mul(elapsed_ms) / window_ms)
        .min(capacity);

    if balance >= cost {
        let remaining = balance - cost;
        entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Bucket {
                    tokens: remaining,
                    last_refill_ms: now_ms,
                },
                expires_at_ms: Some(now_ms + ttl_ms),
            },
        );
        return Ok(ScriptReply {
            allowed: true,
            remaining,
            retry_after_ms: 0,
        });
    }

    // Deny writes nothing: fractional refill credit keeps accruing against
    // the stored last_refill_ms instead of being floored away per probe.
    let needed = cost - tokens;
    let max_credit_ms = (capacity - tokens).saturating_mul(window_ms) / capacity;
    let credit_ms = elapsed_ms.min(max_credit_ms);
    let retry_after_ms = ceil_div(needed.saturating_mul(window_ms), capacity) - credit_ms;

    if let Some(entry) = entries.get_mut(key) {
        entry.expires_at_ms = Some(now_ms + ttl_ms);
    }
    Ok(ScriptReply {
        allowed: false,
        remaining: balance,
        retry_after_ms: retry_after_ms.max(0),
    })
}

/// Mirror of the sliding-window Lua kernel.
#[allow(clippy::too_many_arguments)]
fn sliding_window(
    entries: &mut HashMap<String, Entry>,
    current_key: &str,
    previous_key: &str,
    limit: i64,
    window: i64,
    now: i64,
    cost: i64,
    store_now_ms: i64,
) -> Result<ScriptReply, StoreError> {
    let cur = read_counter(entries, current_key, store_now_ms)?;
    let prev = read_counter(entries, previous_key, store_now_ms)?;

    let elapsed = now.rem_euclid(window);
    let remaining_in_window = window - elapsed;
    let prev_weight = (remaining_in_window * 1000) / window;
    let weighted_prev = prev.saturating_mul(prev_weight) / 1000;
    let weighted = cur + weighted_prev;

    if weighted + cost <= limit {
        let entry = entries.entry(current_key.to_owned()).or_insert(Entry {
            value: Value::Counter(0),
            expires_at_ms: None,
        });
        let Value::Counter(value) = &mut entry.value else {
            return Err(wrong_type());
        };
        *value = value.saturating_add(cost);
        let cur = *value;
        entry.expires_at_ms = Some((now + 2 * window) * 1000);

        let weighted = cur + weighted_prev;
        return Ok(ScriptReply {
            allowed: true,
            remaining: (limit - weighted).max(0),
            retry_after_ms: 0,
        });
    }

    let remaining = (limit - weighted).max(0);
    let avail = limit - cost - cur;
    let mut retry_ms = if prev > 0 && avail >= 0 {
        let target_elapsed_ms = window * 1000 - avail.saturating_mul(window * 1000) / prev;
        target_elapsed_ms - elapsed * 1000
    } else {
        remaining_in_window * 1000
    };
    retry_ms = retry_ms.clamp(1000, remaining_in_window * 1000);

    Ok(ScriptReply {
        allowed: false,
        remaining,
        retry_after_ms: retry_ms,
    })
}
