use std::future::Future;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};

use sluice_store::error::StoreError;
use sluice_store::script::{ScriptKind, ScriptReply, ScriptStore};

use crate::config::RedisConfig;
use crate::scripts;

/// Redis-backed implementation of [`ScriptStore`].
///
/// Uses a `deadpool-redis` connection pool. Each decision script is uploaded
/// once at connect time and addressed afterwards by the SHA-1 handle the
/// store assigned to it; if the store forgets a script (restart, `SCRIPT
/// FLUSH`), the body is re-uploaded and the call retried exactly once.
pub struct RedisScriptStore {
    pool: Pool,
    call_timeout: std::time::Duration,
    /// Store-clock minus local-clock offset, captured at connect. `now_ms`
    /// answers from this offset so a decision costs one script round trip.
    clock_offset_ms: AtomicI64,
    fixed_window: CachedScript,
    token_bucket: CachedScript,
    sliding_window: CachedScript,
}

/// A script body plus the content-addressed handle the store assigned to it.
///
/// The handle is republished through an `RwLock` so a reload on one
/// connection is immediately visible to every other caller, never torn.
struct CachedScript {
    body: &'static str,
    sha: RwLock<String>,
}

impl CachedScript {
    fn new(body: &'static str) -> Self {
        Self {
            body,
            sha: RwLock::new(String::new()),
        }
    }

    fn sha(&self) -> String {
        self.sha
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_sha(&self, sha: String) {
        *self.sha.write().unwrap_or_else(PoisonError::into_inner) = sha;
    }
}

impl RedisScriptStore {
    /// Connect to Redis, upload the decision scripts, and sync the clock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the pool cannot be created or a
    /// connection cannot be established.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let cfg = Config::from_url(config.effective_url());
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            call_timeout: config.call_timeout,
            clock_offset_ms: AtomicI64::new(0),
            fixed_window: CachedScript::new(scripts::FIXED_WINDOW),
            token_bucket: CachedScript::new(scripts::TOKEN_BUCKET),
            sliding_window: CachedScript::new(scripts::SLIDING_WINDOW),
        };

        let mut conn = store.conn().await?;
        store.load_scripts(&mut conn).await?;
        store.sync_clock(&mut conn).await?;
        Ok(store)
    }

    fn script(&self, kind: ScriptKind) -> &CachedScript {
        match kind {
            ScriptKind::FixedWindow => &self.fixed_window,
            ScriptKind::TokenBucket => &self.token_bucket,
            ScriptKind::SlidingWindow => &self.sliding_window,
        }
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Upload every script body and cache the handles the store assigned.
    async fn load_scripts(&self, conn: &mut Connection) -> Result<(), StoreError> {
        for kind in [
            ScriptKind::FixedWindow,
            ScriptKind::TokenBucket,
            ScriptKind::SlidingWindow,
        ] {
            let script = self.script(kind);
            let sha = self
                .timed(script_load(conn, script.body))
                .await?
                .map_err(script_err)?;
            tracing::debug!(script = %kind, sha = %sha, "loaded decision script");
            script.set_sha(sha);
        }
        Ok(())
    }

    /// Capture the offset between the store's `TIME` and the local clock.
    async fn sync_clock(&self, conn: &mut Connection) -> Result<(), StoreError> {
        let (secs, micros): (i64, i64) = self
            .timed(redis::cmd("TIME").query_async(conn))
            .await?
            .map_err(primitive_err)?;
        let server_ms = secs * 1000 + micros / 1000;
        self.clock_offset_ms
            .store(server_ms - local_epoch_ms(), Ordering::Relaxed);
        Ok(())
    }

    /// Bound a store call by the configured per-call timeout.
    async fn timed<T>(&self, fut: impl Future<Output = T> + Send) -> Result<T, StoreError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.call_timeout))
    }
}

#[async_trait]
impl ScriptStore for RedisScriptStore {
    async fn run_script(
        &self,
        kind: ScriptKind,
        keys: &[String],
        argv: &[i64],
    ) -> Result<ScriptReply, StoreError> {
        let script = self.script(kind);
        let mut conn = self.conn().await?;

        let sha = script.sha();
        let raw = match self.timed(evalsha(&mut conn, &sha, keys, argv)).await? {
            Ok(raw) => raw,
            Err(err) if err.kind() == redis::ErrorKind::NoScriptError => {
                // The store forgot the script (restart or SCRIPT FLUSH):
                // re-upload the body and retry exactly once.
                tracing::debug!(script = %kind, "reloading decision script after NOSCRIPT");
                let sha = self
                    .timed(script_load(&mut conn, script.body))
                    .await?
                    .map_err(script_err)?;
                script.set_sha(sha.clone());
                self.timed(evalsha(&mut conn, &sha, keys, argv))
                    .await?
                    .map_err(|e| StoreError::Script(e.to_string()))?
            }
            Err(err) => return Err(script_err(err)),
        };

        ScriptReply::from_raw(&raw)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn().await?;
        self.timed(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?
            .map_err(primitive_err)
    }

    async fn get_bucket(&self, key: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let mut conn = self.conn().await?;
        let (tokens, last_refill_ms): (Option<i64>, Option<i64>) = self
            .timed(
                redis::cmd("HMGET")
                    .arg(key)
                    .arg("tokens")
                    .arg("last_refill_ms")
                    .query_async(&mut conn),
            )
            .await?
            .map_err(primitive_err)?;

        match (tokens, last_refill_ms) {
            (Some(tokens), Some(last_refill_ms)) => Ok(Some((tokens, last_refill_ms))),
            _ => Ok(None),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key.as_str());
        }
        let removed: i64 = self
            .timed(cmd.query_async(&mut conn))
            .await?
            .map_err(primitive_err)?;
        Ok(u64::try_from(removed).unwrap_or(0))
    }

    async fn now_ms(&self) -> Result<i64, StoreError> {
        Ok(local_epoch_ms() + self.clock_offset_ms.load(Ordering::Relaxed))
    }

    async fn close(&self) {
        // Handles die with the pool; clear them so a half-closed store
        // cannot silently serve stale SHAs.
        self.fixed_window.set_sha(String::new());
        self.token_bucket.set_sha(String::new());
        self.sliding_window.set_sha(String::new());
        self.pool.close();
    }
}

async fn evalsha(
    conn: &mut Connection,
    sha: &str,
    keys: &[String],
    argv: &[i64],
) -> redis::RedisResult<Vec<i64>> {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha).arg(keys.len());
    for key in keys {
        cmd.arg(key.as_str());
    }
    for value in argv {
        cmd.arg(*value);
    }
    cmd.query_async(conn).await
}

async fn script_load(conn: &mut Connection, body: &str) -> redis::RedisResult<String> {
    redis::cmd("SCRIPT").arg("LOAD").arg(body).query_async(conn).await
}

fn local_epoch_ms() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

fn connection_fault(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout()
}

fn primitive_err(err: redis::RedisError) -> StoreError {
    if connection_fault(&err) {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn script_err(err: redis::RedisError) -> StoreError {
    if connection_fault(&err) {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Script(err.to_string())
    }
}
