use std::sync::Arc;
use std::time::Duration;

use sluice::{Algorithm, CheckOptions, LimitError, Limiter, ScriptStore, Settings};
use sluice_store_memory::MemoryScriptStore;

/// Midnight of an arbitrary day, divisible by every recognized window.
const DAY0: i64 = 1_728_000_000;

fn limiter_at_secs(now_secs: i64) -> (Limiter, Arc<MemoryScriptStore>) {
    let store = Arc::new(MemoryScriptStore::with_now_ms(now_secs * 1000));
    let limiter = Limiter::with_store(store.clone(), Settings::default());
    (limiter, store)
}

fn sliding() -> CheckOptions {
    CheckOptions {
        algorithm: Some(Algorithm::SlidingWindow),
        ..CheckOptions::default()
    }
}

fn bucket() -> CheckOptions {
    CheckOptions {
        algorithm: Some(Algorithm::TokenBucket),
        ..CheckOptions::default()
    }
}

#[tokio::test]
async fn fixed_window_boundary() {
    // 100/minute, first touch at hh:35:42.
    let t0 = DAY0 + 14 * 3600 + 35 * 60 + 42;
    let (limiter, store) = limiter_at_secs(t0);

    for i in 0..100 {
        let result = limiter.check("u1", "100/minute").await.unwrap();
        assert!(result.allowed, "admission {i}");
        assert_eq!(result.remaining, 99 - i);
        assert_eq!(result.reset_epoch, u64::try_from(t0 - 42 + 60).unwrap());
    }

    store.advance(Duration::from_secs(1));
    let err = limiter.check("u1", "100/minute").await.unwrap_err();
    match err {
        LimitError::LimitExceeded {
            limit,
            remaining,
            retry_after_ms,
        } => {
            assert_eq!(limit, 100);
            assert_eq!(remaining, 0);
            // 17 seconds to the window boundary at hh:36:00.
            assert_eq!(retry_after_ms, 17_000);
        }
        other => panic!("expected LimitExceeded, got {other}"),
    }

    // A fresh window opens exactly at the boundary.
    store.set_now_ms((t0 - 42 + 60) * 1000);
    let result = limiter.check("u1", "100/minute").await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.remaining, 99);
}

#[tokio::test]
async fn token_bucket_steady_state() {
    // 60/minute refills one caller unit per second.
    let t0_ms = DAY0 * 1000;
    let (limiter, store) = limiter_at_secs(DAY0);

    for i in 0..60 {
        let result = limiter
            .check_opts("u1", "60/minute", &bucket())
            .await
            .unwrap();
        assert!(result.allowed, "burst admission {i}");
    }

    store.advance(Duration::from_millis(500));
    let err = limiter
        .check_opts("u1", "60/minute", &bucket())
        .await
        .unwrap_err();
    match err {
        LimitError::LimitExceeded { retry_after_ms, .. } => assert_eq!(retry_after_ms, 500),
        other => panic!("expected LimitExceeded, got {other}"),
    }

    store.set_now_ms(t0_ms + 1000);
    let result = limiter
        .check_opts("u1", "60/minute", &bucket())
        .await
        .unwrap();
    assert!(result.allowed, "one refilled token affords the check");
}

#[tokio::test]
async fn low_rate_token_bucket() {
    // 1/hour: the per-second rate floors to zero, so the refill must run in
    // the millisecond domain.
    let t0_ms = DAY0 * 1000;
    let (limiter, store) = limiter_at_secs(DAY0);

    let result = limiter
        .check_opts("u1", "1/hour", &bucket())
        .await
        .unwrap();
    assert!(result.allowed);
    assert_eq!(result.remaining, 0);

    store.advance(Duration::from_millis(1_799_999));
    let err = limiter
        .check_opts("u1", "1/hour", &bucket())
        .await
        .unwrap_err();
    match err {
        LimitError::LimitExceeded { retry_after_ms, .. } => {
            // Exactly the time until the full refill interval has elapsed.
            assert_eq!(retry_after_ms, 1_800_001);
        }
        other => panic!("expected LimitExceeded, got {other}"),
    }

    store.set_now_ms(t0_ms + 3_600_000);
    let result = limiter
        .check_opts("u1", "1/hour", &bucket())
        .await
        .unwrap();
    assert!(result.allowed, "a full interval affords the next admission");
}

#[tokio::test]
async fn sliding_window_has_no_boundary_burst() {
    // Fill one window, then watch the previous window decay instead of
    // resetting at the boundary.
    let w0 = DAY0 + 14 * 3600;
    let (limiter, store) = limiter_at_secs(w0);

    for i in 0..100 {
        let result = limiter
            .check_opts("u1", "100/minute", &sliding())
            .await
            .unwrap();
        assert!(result.allowed, "admission {i}");
    }

    // At the boundary the previous window still carries full weight.
    store.set_now_ms((w0 + 60) * 1000);
    let err = limiter
        .check_opts("u1", "100/minute", &sliding())
        .await
        .unwrap_err();
    match err {
        LimitError::LimitExceeded { retry_after_ms, .. } => {
            assert_eq!(retry_after_ms, 1000, "headroom opens within the first second");
        }
        other => panic!("expected LimitExceeded, got {other}"),
    }

    // Half-way through, half of the previous window has decayed.
    store.set_now_ms((w0 + 90) * 1000);
    for i in 0..50 {
        let result = limiter
            .check_opts("u1", "100/minute", &sliding())
            .await
            .unwrap();
        assert!(result.allowed, "decayed admission {i}");
    }
    let err = limiter
        .check_opts("u1", "100/minute", &sliding())
        .await
        .unwrap_err();
    assert!(err.is_limit_exceeded());
}

#[tokio::test]
async fn cost_weighted_admissions() {
    // 10/minute at cost 4: the third check would reach 12 and is denied.
    let w0 = DAY0;
    let (limiter, _store) = limiter_at_secs(w0);
    let options = CheckOptions {
        algorithm: Some(Algorithm::SlidingWindow),
        cost: 4,
        ..CheckOptions::default()
    };

    let first = limiter
        .check_opts("u1", "10/minute", &options)
        .await
        .unwrap();
    assert_eq!(first.remaining, 6);
    let second = limiter
        .check_opts("u1", "10/minute", &options)
        .await
        .unwrap();
    assert_eq!(second.remaining, 2);

    let err = limiter
        .check_opts("u1", "10/minute", &options)
        .await
        .unwrap_err();
    match err {
        LimitError::LimitExceeded {
            remaining,
            retry_after_ms,
            ..
        } => {
            assert_eq!(remaining, 2);
            // The current window alone blocks the cost; wait for its end.
            assert_eq!(retry_after_ms, 60_000);
        }
        other => panic!("expected LimitExceeded, got {other}"),
    }
}

#[tokio::test]
async fn tenant_isolation() {
    let (limiter, _store) = limiter_at_secs(DAY0);
    for algorithm in [
        Algorithm::FixedWindow,
        Algorithm::TokenBucket,
        Algorithm::SlidingWindow,
    ] {
        let free = CheckOptions {
            algorithm: Some(algorithm),
            tenant: Some("free".to_owned()),
            ..CheckOptions::default()
        };
        let premium = CheckOptions {
            algorithm: Some(algorithm),
            tenant: Some("premium".to_owned()),
            ..CheckOptions::default()
        };

        for _ in 0..5 {
            limiter.check_opts("u1", "5/minute", &free).await.unwrap();
        }
        let err = limiter.check_opts("u1", "5/minute", &free).await.unwrap_err();
        assert!(err.is_limit_exceeded(), "{algorithm}: free tier exhausted");

        for i in 0..5 {
            let result = limiter
                .check_opts("u1", "5/minute", &premium)
                .await
                .unwrap();
            assert!(
                result.allowed,
                "{algorithm}: premium admission {i} must not share state"
            );
        }
    }
}

#[tokio::test]
async fn fixed_window_admission_cap() {
    // No interleaving of attempts can push admissions past the limit.
    let (limiter, _store) = limiter_at_secs(DAY0);
    let mut allowed = 0;
    for _ in 0..150 {
        let result = limiter
            .check_with_info("u1", "100/minute", &CheckOptions::default())
            .await
            .unwrap();
        if result.allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 100);
}

#[tokio::test]
async fn stored_counters_are_scaled() {
    // Every admitted cost lands in the store multiplied by the fixed-point
    // scale; the caller only ever sees rescaled units.
    let t0 = DAY0 + 300;
    let (limiter, store) = limiter_at_secs(t0);
    let options = CheckOptions {
        cost: 2,
        ..CheckOptions::default()
    };

    for _ in 0..3 {
        limiter.check_opts("u1", "10/minute", &options).await.unwrap();
    }

    let counter = store
        .get_counter(&format!("ratelimit:u1:default:{t0}"))
        .await
        .unwrap();
    assert_eq!(counter, Some(6 * 1000));

    let usage = limiter.usage("u1", "10/minute", None, None).await.unwrap();
    assert_eq!(usage.used, 6);
    assert_eq!(usage.remaining, 4);
}

#[tokio::test]
async fn reset_clears_current_and_previous_windows() {
    let w0 = DAY0;
    let (limiter, store) = limiter_at_secs(w0);

    for _ in 0..100 {
        limiter
            .check_opts("u1", "100/minute", &sliding())
            .await
            .unwrap();
    }
    store.set_now_ms((w0 + 60) * 1000);
    let err = limiter
        .check_opts("u1", "100/minute", &sliding())
        .await
        .unwrap_err();
    assert!(err.is_limit_exceeded());

    limiter
        .reset("u1", "100/minute", Some(Algorithm::SlidingWindow), None)
        .await
        .unwrap();
    let usage = limiter
        .usage("u1", "100/minute", Some(Algorithm::SlidingWindow), None)
        .await
        .unwrap();
    assert_eq!(usage.used, 0);
    let result = limiter
        .check_opts("u1", "100/minute", &sliding())
        .await
        .unwrap();
    assert!(result.allowed, "reset must clear the previous window too");
}

#[tokio::test]
async fn bucket_usage_reports_virtual_refill() {
    let (limiter, store) = limiter_at_secs(DAY0);

    for _ in 0..6 {
        limiter
            .check_opts("u1", "60/minute", &bucket())
            .await
            .unwrap();
    }
    let usage = limiter
        .usage("u1", "60/minute", Some(Algorithm::TokenBucket), None)
        .await
        .unwrap();
    assert_eq!(usage.used, 6);
    assert_eq!(usage.remaining, 54);

    // Three seconds refill three caller units, visible without any write.
    store.advance(Duration::from_secs(3));
    let usage = limiter
        .usage("u1", "60/minute", Some(Algorithm::TokenBucket), None)
        .await
        .unwrap();
    assert_eq!(usage.used, 3);
    assert_eq!(usage.remaining, 57);
}

#[tokio::test]
async fn untouched_identifiers_report_full_headroom() {
    let (limiter, _store) = limiter_at_secs(DAY0);
    for algorithm in [
        Algorithm::FixedWindow,
        Algorithm::TokenBucket,
        Algorithm::SlidingWindow,
    ] {
        let usage = limiter
            .usage("nobody", "25/minute", Some(algorithm), None)
            .await
            .unwrap();
        assert_eq!(usage.limit, 25, "{algorithm}");
        assert_eq!(usage.used, 0, "{algorithm}");
        assert_eq!(usage.remaining, 25, "{algorithm}");
    }
}
