use async_trait::async_trait;

use crate::error::StoreError;

/// Identifies one of the three decision scripts a backend must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    FixedWindow,
    TokenBucket,
    SlidingWindow,
}

impl ScriptKind {
    /// Return the script's registered name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::TokenBucket => "token_bucket",
            Self::SlidingWindow => "sliding_window",
        }
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The integer triple every decision script returns.
///
/// `remaining` is in scaled units; the engine rescales it before it reaches
/// a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptReply {
    pub allowed: bool,
    pub remaining: i64,
    /// Retry hint; each script defines what it reports on an admit.
    pub retry_after_ms: i64,
}

impl ScriptReply {
    /// Validate the raw integer reply a backend received.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnexpectedReply`] unless the reply is exactly
    /// three integers.
    pub fn from_raw(raw: &[i64]) -> Result<Self, StoreError> {
        match raw {
            [allowed, remaining, retry_after_ms] => Ok(Self {
                allowed: *allowed == 1,
                remaining: (*remaining).max(0),
                retry_after_ms: (*retry_after_ms).max(0),
            }),
            _ => Err(StoreError::UnexpectedReply(format!(
                "expected 3 integers, got {}",
                raw.len()
            ))),
        }
    }
}

/// Atomic script execution against the shared key-value store.
///
/// A decision is exactly one `run_script` call. The backend guarantees that
/// the read-modify-write inside a script is never interleaved with any other
/// operation on the same keys, and that every key the script creates or
/// mutates leaves the call with an expiration set.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Execute a decision script atomically with the given keys and
    /// integer-only arguments.
    async fn run_script(
        &self,
        kind: ScriptKind,
        keys: &[String],
        argv: &[i64],
    ) -> Result<ScriptReply, StoreError>;

    /// Read an integer counter. `None` when the key is missing or expired.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Read token-bucket state `(tokens, last_refill_ms)`. `None` when the
    /// bucket has no stored state.
    async fn get_bucket(&self, key: &str) -> Result<Option<(i64, i64)>, StoreError>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Current store-clock time in epoch milliseconds.
    ///
    /// Every decision keys its windows off this clock; callers never supply
    /// their own time.
    async fn now_ms(&self) -> Result<i64, StoreError>;

    /// Release backend resources. Cached script handles become invalid.
    async fn close(&self);
}
