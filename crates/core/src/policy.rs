use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LimitError;

/// Upper bound on the per-request cost accepted by the engine.
pub const MAX_COST: u64 = 1_000_000;

/// Time unit a rate limit is expressed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    /// Return the unit duration in seconds.
    #[must_use]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Return the singular unit name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "second" | "seconds" => Some(Self::Second),
            "minute" | "minutes" => Some(Self::Minute),
            "hour" | "hours" => Some(Self::Hour),
            "day" | "days" => Some(Self::Day),
            _ => None,
        }
    }
}

impl std::fmt::Display for RateUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed rate policy: at most `limit` cost units per `unit` window.
///
/// Parsed once from a caller-supplied `"<N>/<unit>"` string and immutable for
/// the lifetime of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatePolicy {
    pub limit: u64,
    pub unit: RateUnit,
}

impl RatePolicy {
    #[must_use]
    pub fn new(limit: u64, unit: RateUnit) -> Self {
        Self { limit, unit }
    }

    /// Parse `"<N>/<unit>"`. Case-insensitive; whitespace around the slash
    /// and at the ends is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::MalformedRate`] when the pattern does not match,
    /// when `N` is zero, or when the unit is unknown.
    pub fn parse(raw: &str) -> Result<Self, LimitError> {
        let malformed = || LimitError::MalformedRate(raw.to_owned());

        let (count, unit) = raw.trim().split_once('/').ok_or_else(malformed)?;
        let count = count.trim();
        // A bare digit run, so signs and inner whitespace are rejected.
        if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let limit: u64 = count.parse().map_err(|_| malformed())?;
        if limit == 0 {
            return Err(malformed());
        }

        let unit = RateUnit::parse(&unit.trim().to_ascii_lowercase()).ok_or_else(malformed)?;
        Ok(Self { limit, unit })
    }

    /// Window length in seconds.
    #[must_use]
    pub fn window_secs(&self) -> u64 {
        self.unit.seconds()
    }
}

impl FromStr for RatePolicy {
    type Err = LimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.limit, self.unit)
    }
}
