use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sluice_core::key::KeySet;
use sluice_core::{
    Algorithm, CheckResult, LimitError, MAX_COST, RatePolicy, Usage, scaled, to_caller_units,
    window_start,
};
use sluice_store::{ScriptKind, ScriptStore, StoreError};
use sluice_store_redis::{RedisConfig, RedisScriptStore};

use crate::metrics;
use crate::settings::Settings;

/// Per-check options. The default is the engine's default algorithm, no
/// tenant tag, and cost 1.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub algorithm: Option<Algorithm>,
    pub tenant: Option<String>,
    pub cost: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            algorithm: None,
            tenant: None,
            cost: 1,
        }
    }
}

/// The rate-limiting engine.
///
/// Holds no mutable state beyond the store handle; every decision is one
/// atomic script execution against the store, so concurrent engines on
/// different hosts agree on every counter.
pub struct Limiter {
    store: Arc<dyn ScriptStore>,
    settings: Settings,
}

impl Limiter {
    /// Bind the engine to an already-constructed store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ScriptStore>, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Connect the Redis backend described by the settings.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::BackendUnavailable`] when the store cannot be
    /// reached.
    pub async fn connect(settings: Settings) -> Result<Self, LimitError> {
        let config = RedisConfig {
            url: settings.store_url.clone(),
            pool_size: settings.pool_max,
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
            ..RedisConfig::default()
        };
        let store = RedisScriptStore::connect(&config).await.map_err(store_fault)?;
        Ok(Self::with_store(Arc::new(store), settings))
    }

    /// Release the store connection pool and cached script handles.
    pub async fn close(&self) {
        self.store.close().await;
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Check `id` against `rate` with default options.
    ///
    /// # Errors
    ///
    /// A deny surfaces as [`LimitError::LimitExceeded`]; use
    /// [`Limiter::check_with_info`] to receive the full result instead.
    pub async fn check(&self, id: &str, rate: &str) -> Result<CheckResult, LimitError> {
        self.check_opts(id, rate, &CheckOptions::default()).await
    }

    /// Check `id` against `rate`, failing with [`LimitError::LimitExceeded`]
    /// on a deny.
    ///
    /// # Errors
    ///
    /// See [`LimitError`]; programmer errors surface before any store
    /// contact.
    pub async fn check_opts(
        &self,
        id: &str,
        rate: &str,
        options: &CheckOptions,
    ) -> Result<CheckResult, LimitError> {
        let result = self.decide(id, rate, options).await?;
        if result.allowed {
            Ok(result)
        } else {
            Err(LimitError::LimitExceeded {
                limit: result.limit,
                remaining: result.remaining,
                retry_after_ms: result.retry_after_ms,
            })
        }
    }

    /// Check `id` against `rate`, returning the full [`CheckResult`] for
    /// both admits and denies.
    ///
    /// # Errors
    ///
    /// Only faults error here; a deny is an `Ok` result with
    /// `allowed == false`.
    pub async fn check_with_info(
        &self,
        id: &str,
        rate: &str,
        options: &CheckOptions,
    ) -> Result<CheckResult, LimitError> {
        self.decide(id, rate, options).await
    }

    /// Read-only usage snapshot for the algorithm's key(s). Never mutates
    /// store state; token-bucket refill is computed virtually.
    ///
    /// # Errors
    ///
    /// See [`LimitError`].
    pub async fn usage(
        &self,
        id: &str,
        rate: &str,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
    ) -> Result<Usage, LimitError> {
        let policy = RatePolicy::parse(rate)?;
        let algorithm = algorithm.unwrap_or(self.settings.default_algorithm);

        let now_ms = self.store_call(self.store.now_ms()).await?;
        let now_secs = now_ms.div_euclid(1000);
        let keys = KeySet::derive(
            &self.settings.key_prefix,
            id,
            tenant,
            algorithm,
            &policy,
            now_secs,
        );
        let window = i64::try_from(policy.window_secs()).unwrap_or(i64::MAX);
        let start = window_start(now_secs, window);
        let limit_fp = scaled(policy.limit);

        let usage = match algorithm {
            Algorithm::FixedWindow => {
                let used_fp = self
                    .store_call(self.store.get_counter(&keys.current))
                    .await?
                    .unwrap_or(0);
                Usage {
                    limit: policy.limit,
                    used: to_caller_units(used_fp),
                    remaining: to_caller_units((limit_fp - used_fp).max(0)),
                    reset_epoch: epoch(start + window),
                }
            }
            Algorithm::TokenBucket => {
                let window_ms = window * 1000;
                let (tokens, last_refill_ms) = self
                    .store_call(self.store.get_bucket(&keys.current))
                    .await?
                    .unwrap_or((limit_fp, now_ms));
                let elapsed_ms = (now_ms - last_refill_ms).max(0);
                let tokens = tokens
                    .saturating_add(limit_fp.saturating_mul(elapsed_ms) / window_ms)
                    .min(limit_fp);
                let deficit = limit_fp - tokens;
                let full_again = if deficit == 0 {
                    now_secs
                } else {
                    now_secs + ceil_div(ceil_div(deficit.saturating_mul(window_ms), limit_fp), 1000)
                };
                Usage {
                    limit: policy.limit,
                    used: to_caller_units(deficit),
                    remaining: to_caller_units(tokens),
                    reset_epoch: epoch(full_again),
                }
            }
            Algorithm::SlidingWindow => {
                let cur = self
                    .store_call(self.store.get_counter(&keys.current))
                    .await?
                    .unwrap_or(0);
                let prev = match &keys.previous {
                    Some(previous) => self
                        .store_call(self.store.get_counter(previous))
                        .await?
                        .unwrap_or(0),
                    None => 0,
                };
                let elapsed = now_secs - start;
                let weight = ((window - elapsed) * 1000) / window;
                let weighted = cur + prev.saturating_mul(weight) / 1000;
                Usage {
                    limit: policy.limit,
                    used: to_caller_units(weighted),
                    remaining: to_caller_units((limit_fp - weighted).max(0)),
                    reset_epoch: epoch(start + window),
                }
            }
        };
        Ok(usage)
    }

    /// Delete the algorithm's key(s) for `id`. A no-op on missing keys.
    ///
    /// # Errors
    ///
    /// See [`LimitError`].
    pub async fn reset(
        &self,
        id: &str,
        rate: &str,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
    ) -> Result<(), LimitError> {
        let policy = RatePolicy::parse(rate)?;
        let algorithm = algorithm.unwrap_or(self.settings.default_algorithm);

        let now_ms = self.store_call(self.store.now_ms()).await?;
        let keys = KeySet::derive(
            &self.settings.key_prefix,
            id,
            tenant,
            algorithm,
            &policy,
            now_ms.div_euclid(1000),
        );
        let removed = self.store_call(self.store.delete(&keys.all_keys())).await?;
        metrics::record_reset(self.settings.metrics_enabled);
        tracing::debug!(id = %id, algorithm = %algorithm, removed, "rate limit state reset");
        Ok(())
    }

    /// Run one decision: derive keys, execute the algorithm's script, and
    /// rescale the reply to caller units.
    async fn decide(
        &self,
        id: &str,
        rate: &str,
        options: &CheckOptions,
    ) -> Result<CheckResult, LimitError> {
        let policy = RatePolicy::parse(rate)?;
        if options.cost == 0 || options.cost > MAX_COST {
            return Err(LimitError::InvalidCost(options.cost));
        }
        let algorithm = options.algorithm.unwrap_or(self.settings.default_algorithm);

        let now_ms = self.store_call(self.store.now_ms()).await?;
        let now_secs = now_ms.div_euclid(1000);
        let keys = KeySet::derive(
            &self.settings.key_prefix,
            id,
            options.tenant.as_deref(),
            algorithm,
            &policy,
            now_secs,
        );

        let window = i64::try_from(policy.window_secs()).unwrap_or(i64::MAX);
        let start = window_start(now_secs, window);
        let limit_fp = scaled(policy.limit);
        let cost_fp = scaled(options.cost);
        let (kind, argv) = match algorithm {
            Algorithm::FixedWindow => (
                ScriptKind::FixedWindow,
                vec![limit_fp, window, start + window, cost_fp],
            ),
            Algorithm::TokenBucket => (
                ScriptKind::TokenBucket,
                vec![limit_fp, window, now_ms, cost_fp],
            ),
            Algorithm::SlidingWindow => (
                ScriptKind::SlidingWindow,
                vec![limit_fp, window, now_secs, cost_fp],
            ),
        };

        let reply = self
            .store_call(self.store.run_script(kind, &keys.script_keys(), &argv))
            .await?;

        let reset_epoch = match algorithm {
            Algorithm::TokenBucket => now_secs + reply.retry_after_ms / 1000,
            _ => start + window,
        };
        let result = CheckResult {
            allowed: reply.allowed,
            limit: policy.limit,
            remaining: to_caller_units(reply.remaining),
            retry_after_ms: u64::try_from(reply.retry_after_ms).unwrap_or(0),
            reset_epoch: epoch(reset_epoch),
        };

        metrics::record_check(self.settings.metrics_enabled, algorithm, result.allowed);
        if !result.allowed {
            tracing::debug!(
                id = %id,
                algorithm = %algorithm,
                retry_after_ms = result.retry_after_ms,
                "rate limit denied"
            );
        }
        Ok(result)
    }

    /// Await a store call, recording and mapping any fault.
    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, LimitError> {
        match call.await {
            Ok(value) => Ok(value),
            Err(err) => {
                metrics::record_store_error(self.settings.metrics_enabled);
                tracing::warn!(error = %err, "store call failed");
                Err(store_fault(err))
            }
        }
    }
}

fn store_fault(err: StoreError) -> LimitError {
    match err {
        StoreError::Connection(message) | StoreError::Backend(message) => {
            LimitError::BackendUnavailable(message)
        }
        StoreError::Timeout(after) => {
            LimitError::BackendUnavailable(format!("store call timed out after {after:?}"))
        }
        StoreError::Script(message) | StoreError::UnexpectedReply(message) => {
            LimitError::ScriptFailure(message)
        }
    }
}

fn epoch(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_store_memory::MemoryScriptStore;

    const T0_MS: i64 = 1_728_000_000_000;

    fn limiter() -> (Limiter, Arc<MemoryScriptStore>) {
        let store = Arc::new(MemoryScriptStore::with_now_ms(T0_MS));
        let limiter = Limiter::with_store(store.clone(), Settings::default());
        (limiter, store)
    }

    #[tokio::test]
    async fn malformed_rate_fails_before_store_contact() {
        let (limiter, _) = limiter();
        let err = limiter.check("u1", "ten/minute").await.unwrap_err();
        assert!(matches!(err, LimitError::MalformedRate(_)));
    }

    #[tokio::test]
    async fn invalid_cost_is_rejected() {
        let (limiter, _) = limiter();
        for cost in [0, MAX_COST + 1] {
            let options = CheckOptions {
                cost,
                ..CheckOptions::default()
            };
            let err = limiter
                .check_opts("u1", "10/minute", &options)
                .await
                .unwrap_err();
            assert!(matches!(err, LimitError::InvalidCost(c) if c == cost));
        }
    }

    #[tokio::test]
    async fn check_maps_deny_to_limit_exceeded() {
        let (limiter, _) = limiter();
        assert!(limiter.check("u1", "1/minute").await.unwrap().allowed);
        let err = limiter.check("u1", "1/minute").await.unwrap_err();
        match err {
            LimitError::LimitExceeded {
                limit,
                remaining,
                retry_after_ms,
            } => {
                assert_eq!(limit, 1);
                assert_eq!(remaining, 0);
                assert!(retry_after_ms > 0);
            }
            other => panic!("expected LimitExceeded, got {other}"),
        }
    }

    #[tokio::test]
    async fn check_with_info_returns_denies_as_results() {
        let (limiter, _) = limiter();
        let options = CheckOptions::default();
        assert!(
            limiter
                .check_with_info("u1", "1/minute", &options)
                .await
                .unwrap()
                .allowed
        );
        let denied = limiter
            .check_with_info("u1", "1/minute", &options)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);
        assert!(denied.retry_after_ms > 0);
    }

    #[tokio::test]
    async fn options_select_algorithm_over_default() {
        let (limiter, store) = limiter();
        let options = CheckOptions {
            algorithm: Some(Algorithm::TokenBucket),
            ..CheckOptions::default()
        };
        limiter
            .check_opts("u1", "10/minute", &options)
            .await
            .unwrap();
        // The bucket key exists; no fixed-window counter was touched.
        assert!(
            store
                .get_bucket("ratelimit:u1:default:bucket")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn reset_is_idempotent_on_missing_state() {
        let (limiter, _) = limiter();
        limiter.reset("ghost", "10/minute", None, None).await.unwrap();
        limiter.reset("ghost", "10/minute", None, None).await.unwrap();
    }

    #[tokio::test]
    async fn usage_reads_without_mutating() {
        let (limiter, store) = limiter();
        let options = CheckOptions {
            algorithm: Some(Algorithm::TokenBucket),
            ..CheckOptions::default()
        };
        for _ in 0..3 {
            limiter
                .check_opts("u1", "10/minute", &options)
                .await
                .unwrap();
        }

        let before = store
            .get_bucket("ratelimit:u1:default:bucket")
            .await
            .unwrap();
        let usage = limiter
            .usage("u1", "10/minute", Some(Algorithm::TokenBucket), None)
            .await
            .unwrap();
        assert_eq!(usage.limit, 10);
        assert_eq!(usage.used, 3);
        assert_eq!(usage.remaining, 7);
        let after = store
            .get_bucket("ratelimit:u1:default:bucket")
            .await
            .unwrap();
        assert_eq!(before, after, "usage must not persist a refill");
    }

    #[tokio::test]
    async fn store_faults_map_to_the_error_taxonomy() {
        assert!(matches!(
            store_fault(StoreError::Connection("refused".into())),
            LimitError::BackendUnavailable(_)
        ));
        assert!(matches!(
            store_fault(StoreError::Timeout(Duration::from_secs(5))),
            LimitError::BackendUnavailable(_)
        ));
        assert!(matches!(
            store_fault(StoreError::Script("boom".into())),
            LimitError::ScriptFailure(_)
        ));
        assert!(matches!(
            store_fault(StoreError::UnexpectedReply("2 ints".into())),
            LimitError::ScriptFailure(_)
        ));
    }
}
