use serde::{Deserialize, Serialize};

/// Outcome of a rate-limit decision, in caller units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// The configured limit.
    pub limit: u64,
    /// Remaining headroom in the current window or bucket.
    pub remaining: u64,
    /// Retry hint, forwarded verbatim from the decision script. On a deny
    /// this is the wait until the next admission can succeed; the fixed
    /// window also reports its time-to-boundary on admits.
    pub retry_after_ms: u64,
    /// Epoch second at which the window resets (or the bucket affords the
    /// denied cost).
    pub reset_epoch: u64,
}

/// Read-only usage snapshot, in caller units. Taking one never mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub limit: u64,
    /// Cost-weighted admissions counted against the limit right now.
    pub used: u64,
    pub remaining: u64,
    pub reset_epoch: u64,
}
