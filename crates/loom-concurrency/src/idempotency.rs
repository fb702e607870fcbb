//! Orchestration over the three-layer idempotency cache (§4.7): "On
//! `PROCESSING`, callers back off and retry or subscribe for result; on
//! `COMPLETE`, the cached result is returned immediately." This module
//! is the backoff/retry policy on top of
//! `loom_repositories::IdempotencyCache`'s bare check/complete
//! primitives.

use std::future::Future;
use std::time::Duration;

use loom_domain::{Error, Result};
use loom_repositories::{CacheOutcome, IdempotencyCache, IdempotencyLayer};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Polling policy while another caller holds the `Processing` slot.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_millis(25), max: Duration::from_millis(400), max_attempts: 10 }
    }
}

/// Runs `work` under idempotency protection for `(layer, key)`:
/// - `New` — this caller runs `work`, persists the result as
///   `Complete`, and returns it.
/// - `Processing` — polls with exponential backoff until the other
///   caller completes the entry or `policy.max_attempts` is exhausted
///   (the latter surfaces `Error::Timeout`, matching §7's "Timeout —
///   soft-budget or deadline expired").
/// - `Complete` — returns the cached result without running `work`.
pub async fn run_idempotent<F, Fut, T>(
    cache: &dyn IdempotencyCache,
    layer: IdempotencyLayer,
    key: &str,
    ttl: Duration,
    policy: BackoffPolicy,
    work: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Serialize + DeserializeOwned,
{
    match cache.check_or_start(layer, key, ttl).await? {
        CacheOutcome::New => {
            let result = work().await;
            match &result {
                Ok(value) => {
                    let encoded = serde_json::to_value(value).map_err(Error::Json)?;
                    cache.complete(layer, key, encoded, ttl).await?;
                }
                Err(_) => {
                    // Leave the entry as `Processing` to expire on its own TTL;
                    // a hard failure here must not poison the slot for retries
                    // that recompute from scratch once it lapses.
                }
            }
            result
        }
        CacheOutcome::Complete(value) => serde_json::from_value(value).map_err(Error::Json),
        CacheOutcome::Processing => wait_for_completion(cache, layer, key, policy).await,
    }
}

async fn wait_for_completion<T: DeserializeOwned>(
    cache: &dyn IdempotencyCache,
    layer: IdempotencyLayer,
    key: &str,
    policy: BackoffPolicy,
) -> Result<T> {
    let mut delay = policy.initial;
    for _ in 0..policy.max_attempts {
        tokio::time::sleep(delay).await;
        if let CacheOutcome::Complete(value) = cache.check_or_start(layer, key, Duration::from_secs(0)).await? {
            return serde_json::from_value(value).map_err(Error::Json);
        }
        delay = (delay * 2).min(policy.max);
    }
    Err(Error::Timeout(format!("idempotency key {key} did not complete within backoff budget")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_repositories::InMemoryIdempotencyCache;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn new_key_runs_work_once_and_caches_result() {
        let cache = InMemoryIdempotencyCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: String = run_idempotent(&cache, IdempotencyLayer::Api, "k1", Duration::from_secs(60), BackoffPolicy::default(), || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok("done".to_string())
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn complete_key_skips_work() {
        let cache = InMemoryIdempotencyCache::new();
        cache.complete(IdempotencyLayer::Turn, "k2", serde_json::json!("cached"), Duration::from_secs(60)).await.unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: String = run_idempotent(&cache, IdempotencyLayer::Turn, "k2", Duration::from_secs(60), BackoffPolicy::default(), || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        })
        .await
        .unwrap();

        assert_eq!(result, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn processing_key_waits_then_returns_completed_result() {
        let cache = Arc::new(InMemoryIdempotencyCache::new());
        cache.check_or_start(IdempotencyLayer::Tool, "k3", Duration::from_secs(60)).await.unwrap();

        let writer = cache.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            writer.complete(IdempotencyLayer::Tool, "k3", serde_json::json!("resolved"), Duration::from_secs(60)).await.unwrap();
        });

        let policy = BackoffPolicy { initial: Duration::from_millis(10), max: Duration::from_millis(20), max_attempts: 20 };
        let result: String = run_idempotent(&*cache, IdempotencyLayer::Tool, "k3", Duration::from_secs(60), policy, || async { Ok("unused".to_string()) })
            .await
            .unwrap();

        assert_eq!(result, "resolved");
    }

    #[tokio::test]
    async fn processing_key_times_out_after_max_attempts() {
        let cache = InMemoryIdempotencyCache::new();
        cache.check_or_start(IdempotencyLayer::Tool, "k4", Duration::from_secs(60)).await.unwrap();

        let policy = BackoffPolicy { initial: Duration::from_millis(5), max: Duration::from_millis(5), max_attempts: 3 };
        let result: Result<String> =
            run_idempotent(&cache, IdempotencyLayer::Tool, "k4", Duration::from_secs(60), policy, || async { Ok("unused".to_string()) }).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
