use thiserror::Error;

/// Caller-facing error taxonomy for rate-limit decisions.
///
/// `MalformedRate`, `UnknownAlgorithm`, and `InvalidCost` are programmer
/// errors and surface before any store contact. `LimitExceeded` is an
/// expected deny, not a fault; callers map it to a 429-equivalent response.
/// The remaining variants are infrastructural: the engine surfaces them and
/// leaves fail-open vs fail-closed to the caller.
#[derive(Debug, Error)]
pub enum LimitError {
    #[error("malformed rate: {0:?}")]
    MalformedRate(String),

    #[error("unknown algorithm: {0:?}")]
    UnknownAlgorithm(String),

    #[error("invalid cost: {0}")]
    InvalidCost(u64),

    #[error("rate limit exceeded: {limit} per window, retry after {retry_after_ms} ms")]
    LimitExceeded {
        limit: u64,
        remaining: u64,
        retry_after_ms: u64,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("script failure: {0}")]
    ScriptFailure(String),
}

impl LimitError {
    /// `true` when the error is an expected deny rather than a fault.
    #[must_use]
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_exceeded_is_not_a_fault() {
        let err = LimitError::LimitExceeded {
            limit: 10,
            remaining: 0,
            retry_after_ms: 1500,
        };
        assert!(err.is_limit_exceeded());
        assert!(!LimitError::InvalidCost(0).is_limit_exceeded());
    }

    #[test]
    fn display_carries_retry_hint() {
        let err = LimitError::LimitExceeded {
            limit: 10,
            remaining: 0,
            retry_after_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: 10 per window, retry after 1500 ms"
        );
    }
}
