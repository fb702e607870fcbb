use std::collections::HashMap;
use std::time::{Duration, Instant};

use loom_domain::Result;
use parking_lot::Mutex;

/// The three independent idempotency layers (§4.7), each with its own
/// default TTL carried in `loom_domain::config::IdempotencyConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdempotencyLayer {
    Api,
    Turn,
    Tool,
}

#[derive(Debug, Clone)]
pub enum CacheOutcome {
    /// No entry existed; the caller now owns the `Processing` slot it
    /// just created and must call `complete` when done.
    New,
    /// Another caller holds the slot — back off and retry, or subscribe.
    Processing,
    Complete(serde_json::Value),
}

enum EntryState {
    Processing,
    Complete(serde_json::Value),
}

struct Entry {
    state: EntryState,
    set_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired(&self) -> bool {
        self.set_at.elapsed() > self.ttl
    }
}

/// Three-layer idempotency cache: `NEW -> PROCESSING` is an atomic
/// set-if-absent-or-expired; `PROCESSING -> COMPLETE` overwrites (§4.7).
#[async_trait::async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Checks the entry for `(layer, key)`. If absent or expired, installs
    /// a `Processing` marker and returns `New` — the caller now owns
    /// doing the work. Otherwise returns the entry's current state.
    async fn check_or_start(&self, layer: IdempotencyLayer, key: &str, ttl: Duration) -> Result<CacheOutcome>;
    async fn complete(&self, layer: IdempotencyLayer, key: &str, result: serde_json::Value, ttl: Duration) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<(IdempotencyLayer, String), Entry>>,
}

impl InMemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn check_or_start(&self, layer: IdempotencyLayer, key: &str, ttl: Duration) -> Result<CacheOutcome> {
        let mut entries = self.entries.lock();
        let map_key = (layer, key.to_string());
        if let Some(entry) = entries.get(&map_key) {
            if !entry.expired() {
                return Ok(match &entry.state {
                    EntryState::Processing => CacheOutcome::Processing,
                    EntryState::Complete(v) => CacheOutcome::Complete(v.clone()),
                });
            }
        }
        entries.insert(map_key, Entry { state: EntryState::Processing, set_at: Instant::now(), ttl });
        Ok(CacheOutcome::New)
    }

    async fn complete(&self, layer: IdempotencyLayer, key: &str, result: serde_json::Value, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            (layer, key.to_string()),
            Entry { state: EntryState::Complete(result), set_at: Instant::now(), ttl },
        );
        Ok(())
    }
}
