use sha2::{Digest, Sha256};

use crate::algorithm::Algorithm;
use crate::policy::RatePolicy;

/// Maximum length in bytes of a derived store key.
pub const MAX_KEY_BYTES: usize = 200;

/// Tenant segment used when the caller supplies no tenant tag.
pub const DEFAULT_TENANT: &str = "default";

/// The derived store key(s) for one decision.
///
/// Derivation is deterministic: equal inputs yield byte-identical keys, which
/// is what lets every client land on the same counter for the same window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    algorithm: Algorithm,
    /// Key the decision script mutates.
    pub current: String,
    /// Previous-window key, for algorithms that keep one.
    pub previous: Option<String>,
}

impl KeySet {
    /// Derive the key(s) for a decision.
    ///
    /// `now_secs` must come from the store's clock; windowed layouts embed
    /// the epoch-aligned window start.
    #[must_use]
    pub fn derive(
        prefix: &str,
        id: &str,
        tenant: Option<&str>,
        algorithm: Algorithm,
        policy: &RatePolicy,
        now_secs: i64,
    ) -> Self {
        let sid = sanitize_segment(id);
        let st = sanitize_segment(tenant.unwrap_or(DEFAULT_TENANT));
        let window = i64::try_from(policy.window_secs()).unwrap_or(i64::MAX);
        let start = window_start(now_secs, window);

        let (current, previous) = match algorithm {
            Algorithm::FixedWindow => (
                format!("{prefix}:{sid}:{st}:{start}"),
                Some(format!("{prefix}:{sid}:{st}:{}", start - window)),
            ),
            Algorithm::TokenBucket => (format!("{prefix}:{sid}:{st}:bucket"), None),
            Algorithm::SlidingWindow => (
                format!("{prefix}:{sid}:{st}:sliding:{start}"),
                Some(format!("{prefix}:{sid}:{st}:sliding:{}", start - window)),
            ),
        };

        Self {
            algorithm,
            current: bound_length(current),
            previous: previous.map(bound_length),
        }
    }

    /// Keys passed to the decision script, current window first.
    ///
    /// Only the sliding window reads its previous counter inside the script;
    /// the fixed-window previous key exists solely so `reset` can clear it.
    #[must_use]
    pub fn script_keys(&self) -> Vec<String> {
        match (self.algorithm, &self.previous) {
            (Algorithm::SlidingWindow, Some(previous)) => {
                vec![self.current.clone(), previous.clone()]
            }
            _ => vec![self.current.clone()],
        }
    }

    /// Every key owned by the decision, for reset.
    #[must_use]
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = vec![self.current.clone()];
        keys.extend(self.previous.clone());
        keys
    }
}

/// Epoch-aligned start of the window containing `now_secs`.
#[must_use]
pub fn window_start(now_secs: i64, window_secs: i64) -> i64 {
    if window_secs <= 0 {
        return now_secs;
    }
    now_secs - now_secs.rem_euclid(window_secs)
}

/// Replace `:` and whitespace so caller-supplied segments cannot alter the
/// key shape.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Cap a composed key at [`MAX_KEY_BYTES`], keeping a human-readable head and
/// replacing the tail with 16 hex characters of SHA-256 over the full key.
fn bound_length(key: String) -> String {
    if key.len() <= MAX_KEY_BYTES {
        return key;
    }
    let digest = Sha256::digest(key.as_bytes());
    let tail = hex::encode(&digest[..8]);
    let mut cut = MAX_KEY_BYTES / 2;
    while !key.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{tail}", &key[..cut])
}
