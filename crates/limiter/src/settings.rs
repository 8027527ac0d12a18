use serde::{Deserialize, Serialize};

use sluice_core::Algorithm;

/// Engine configuration: the store connection plus decision defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection endpoint for the backing key-value store.
    pub store_url: String,

    /// String prepended to every derived key.
    pub key_prefix: String,

    /// Algorithm applied when a check does not name one.
    pub default_algorithm: Algorithm,

    /// Maximum concurrent store connections.
    pub pool_max: usize,

    /// Per-call timeout on the store, in milliseconds.
    pub call_timeout_ms: u64,

    /// Whether decision counters are emitted through the `metrics` facade.
    /// The exporter is the embedding application's concern.
    pub metrics_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: String::from("redis://127.0.0.1:6379"),
            key_prefix: String::from("ratelimit"),
            default_algorithm: Algorithm::FixedWindow,
            pool_max: 50,
            call_timeout_ms: 5_000,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = Settings::default();
        assert_eq!(settings.store_url, "redis://127.0.0.1:6379");
        assert_eq!(settings.key_prefix, "ratelimit");
        assert_eq!(settings.default_algorithm, Algorithm::FixedWindow);
        assert_eq!(settings.pool_max, 50);
        assert_eq!(settings.call_timeout_ms, 5_000);
        assert!(settings.metrics_enabled);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "default_algorithm": "sliding_window", "key_prefix": "api" }"#,
        )
        .unwrap();
        assert_eq!(settings.default_algorithm, Algorithm::SlidingWindow);
        assert_eq!(settings.key_prefix, "api");
        assert_eq!(settings.pool_max, 50);
    }
}
