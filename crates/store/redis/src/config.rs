use std::time::Duration;

/// Configuration for the Redis script-execution backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Use the `rediss://` scheme for TLS connections. When `tls_enabled` is
    /// set, a `redis://` URL is automatically upgraded to `rediss://`.
    pub url: String,

    /// Number of connections in the `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    pub connection_timeout: Duration,

    /// Timeout applied to every store call.
    pub call_timeout: Duration,

    /// Whether TLS is enabled. When `true`, a `redis://` URL is automatically
    /// upgraded to `rediss://`.
    pub tls_enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            pool_size: 50,
            connection_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            tls_enabled: false,
        }
    }
}

impl RedisConfig {
    /// Return the effective connection URL, upgrading to `rediss://` when TLS
    /// is enabled.
    pub fn effective_url(&self) -> String {
        if self.tls_enabled && self.url.starts_with("redis://") {
            self.url.replacen("redis://", "rediss://", 1)
        } else {
            self.url.clone()
        }
    }
}
