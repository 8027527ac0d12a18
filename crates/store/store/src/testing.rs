use crate::error::StoreError;
use crate::script::{ScriptKind, ScriptStore};

/// Run the backend conformance suite.
///
/// Call this from a backend's test module with a fresh store and a key
/// prefix that is unique per run (shared stores keep state across runs).
///
/// # Errors
///
/// Returns an error if the store faults; behavioral mismatches panic with a
/// message naming the failed expectation.
pub async fn run_store_conformance_tests(
    store: &dyn ScriptStore,
    prefix: &str,
) -> Result<(), StoreError> {
    test_missing_counter(store, prefix).await?;
    test_missing_bucket(store, prefix).await?;
    test_delete_idempotent(store, prefix).await?;
    test_fixed_window_admission(store, prefix).await?;
    test_token_bucket_burst(store, prefix).await?;
    test_sliding_window_admission(store, prefix).await?;
    Ok(())
}

async fn test_missing_counter(store: &dyn ScriptStore, prefix: &str) -> Result<(), StoreError> {
    let value = store.get_counter(&format!("{prefix}:missing")).await?;
    assert!(value.is_none(), "missing counter should read None");
    Ok(())
}

async fn test_missing_bucket(store: &dyn ScriptStore, prefix: &str) -> Result<(), StoreError> {
    let state = store.get_bucket(&format!("{prefix}:missing-bucket")).await?;
    assert!(state.is_none(), "missing bucket should read None");
    Ok(())
}

async fn test_delete_idempotent(store: &dyn ScriptStore, prefix: &str) -> Result<(), StoreError> {
    let keys = vec![format!("{prefix}:never-created")];
    let removed = store.delete(&keys).await?;
    assert_eq!(removed, 0, "deleting a missing key should remove nothing");
    let removed = store.delete(&keys).await?;
    assert_eq!(removed, 0, "repeated delete should stay a no-op");
    Ok(())
}

async fn test_fixed_window_admission(
    store: &dyn ScriptStore,
    prefix: &str,
) -> Result<(), StoreError> {
    let key = format!("{prefix}:fw");
    let keys = vec![key.clone()];
    let now_secs = store.now_ms().await? / 1000;
    // Window end far enough out that the suite never crosses it.
    let argv = [5_000, 60, now_secs + 60, 1_000];

    for i in 0..5 {
        let reply = store.run_script(ScriptKind::FixedWindow, &keys, &argv).await?;
        assert!(reply.allowed, "admission {i} should be allowed");
        assert_eq!(reply.remaining, 4_000 - i * 1_000, "remaining after {i}");
        assert_eq!(reply.retry_after_ms % 1_000, 0, "retry is second-granular");
    }

    let reply = store.run_script(ScriptKind::FixedWindow, &keys, &argv).await?;
    assert!(!reply.allowed, "sixth admission should be denied");
    assert_eq!(reply.remaining, 0);
    assert!(reply.retry_after_ms > 0, "denial must carry a retry hint");

    // A denied request still contributes to the counter.
    let counter = store.get_counter(&key).await?;
    assert_eq!(counter, Some(6_000), "denied cost still counted");

    let removed = store.delete(&[key]).await?;
    assert_eq!(removed, 1, "counter key should exist until deleted");
    Ok(())
}

async fn test_token_bucket_burst(store: &dyn ScriptStore, prefix: &str) -> Result<(), StoreError> {
    let key = format!("{prefix}:bucket");
    let keys = vec![key.clone()];

    for i in 0..5 {
        let now_ms = store.now_ms().await?;
        let argv = [5_000, 60, now_ms, 1_000];
        let reply = store.run_script(ScriptKind::TokenBucket, &keys, &argv).await?;
        assert!(reply.allowed, "burst admission {i} should be allowed");
    }

    let now_ms = store.now_ms().await?;
    let argv = [5_000, 60, now_ms, 1_000];
    let reply = store.run_script(ScriptKind::TokenBucket, &keys, &argv).await?;
    assert!(!reply.allowed, "empty bucket should deny");
    assert!(reply.retry_after_ms > 0, "denial must carry a retry hint");
    assert!(reply.remaining < 1_000, "remaining below one caller unit");

    let state = store.get_bucket(&key).await?;
    let (tokens, last_refill_ms) = state.expect("bucket state should persist after admissions");
    assert!(tokens < 1_000, "tokens drained by the burst, got {tokens}");
    assert!(last_refill_ms > 0);

    store.delete(&[key]).await?;
    Ok(())
}

async fn test_sliding_window_admission(
    store: &dyn ScriptStore,
    prefix: &str,
) -> Result<(), StoreError> {
    let current = format!("{prefix}:sliding:current");
    let previous = format!("{prefix}:sliding:previous");
    let keys = vec![current.clone(), previous.clone()];
    let now_secs = store.now_ms().await? / 1000;
    let argv = [5_000, 60, now_secs, 1_000];

    for i in 0..5 {
        let reply = store
            .run_script(ScriptKind::SlidingWindow, &keys, &argv)
            .await?;
        assert!(reply.allowed, "admission {i} should be allowed");
    }

    let reply = store
        .run_script(ScriptKind::SlidingWindow, &keys, &argv)
        .await?;
    assert!(!reply.allowed, "sixth admission should be denied");
    assert!(reply.retry_after_ms >= 1_000, "retry clamps to at least 1s");

    // Only admitted costs are recorded.
    let counter = store.get_counter(&current).await?;
    assert_eq!(counter, Some(5_000), "denied cost must not be recorded");

    store.delete(&keys).await?;
    Ok(())
}
