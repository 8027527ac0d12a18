use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LimitError;

/// The rate-limiting algorithm applied to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter per epoch-aligned window; resets at the boundary.
    FixedWindow,
    /// Continuous-refill bucket with burst up to the limit.
    TokenBucket,
    /// Two-window weighted average; smooths the boundary.
    SlidingWindow,
}

impl Algorithm {
    /// Return the wire tag for this algorithm.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::TokenBucket => "token_bucket",
            Self::SlidingWindow => "sliding_window",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Self::FixedWindow),
            "token_bucket" => Ok(Self::TokenBucket),
            "sliding_window" => Ok(Self::SlidingWindow),
            other => Err(LimitError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_as_str() {
        assert_eq!(Algorithm::FixedWindow.as_str(), "fixed_window");
        assert_eq!(Algorithm::TokenBucket.as_str(), "token_bucket");
        assert_eq!(Algorithm::SlidingWindow.as_str(), "sliding_window");
    }

    #[test]
    fn from_str_round_trip() {
        for algorithm in [
            Algorithm::FixedWindow,
            Algorithm::TokenBucket,
            Algorithm::SlidingWindow,
        ] {
            let parsed: Algorithm = algorithm.as_str().parse().unwrap();
            assert_eq!(parsed, algorithm);
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = "leaky_bucket".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, LimitError::UnknownAlgorithm(tag) if tag == "leaky_bucket"));
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Algorithm::TokenBucket).unwrap();
        assert_eq!(json, "\"token_bucket\"");
        let back: Algorithm = serde_json::from_str("\"sliding_window\"").unwrap();
        assert_eq!(back, Algorithm::SlidingWindow);
    }
}
