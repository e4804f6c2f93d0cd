//! TTL + LRU cache in front of a [`Resolver`], with request coalescing.
//!
//! Concurrent requests for the same key share one in-flight resolution. The
//! shared future is tracked weakly: once every caller waiting on it has given
//! up it is dropped, which aborts the network work, and the next caller
//! starts over.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::report::{Event, NoopReporter, Reporter};
use crate::transport::Deadline;
use crate::{
    AtIdentifier, CacheConfig, Did, DidMode, Handle, IdentityError, IdentityRecord, Resolver,
};

type Outcome = Result<IdentityRecord, IdentityError>;
type Resolution = BoxFuture<'static, Outcome>;

/// Handle and DID lookups live in separate key spaces; a DID is keyed per
/// mode since the two modes answer differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Handle(Handle),
    Did(Did, DidMode),
}

struct CacheEntry {
    outcome: Outcome,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Whether this entry was produced for, or points at, `identifier`.
    fn mentions(&self, identifier: &AtIdentifier) -> bool {
        match (&self.outcome, identifier) {
            (Ok(record), AtIdentifier::Did(did)) => &record.did == did,
            (Ok(record), AtIdentifier::Handle(handle)) => {
                record.handle.as_ref() == Some(handle)
                    || record.claimed_handle.as_ref() == Some(handle)
            }
            (Err(err), AtIdentifier::Did(did)) => err.claimed_did() == Some(did),
            (Err(IdentityError::Mismatch { handle: h, .. }), AtIdentifier::Handle(handle)) => {
                h == handle
            }
            (Err(_), AtIdentifier::Handle(_)) => false,
        }
    }
}

/// In-flight marker. `id` tells a resolution whether it is still the one the
/// cache is waiting for when it finishes.
struct Pending {
    id: u64,
    task: WeakShared<Resolution>,
}

struct State {
    entries: LruCache<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, Pending>,
    next_id: u64,
}

/// Caches identity records from an inner [`Resolver`].
///
/// Positive answers live for `verified_ttl`, not-found and mismatch answers
/// for `negative_ttl`. Transport failures, oversized responses and syntax
/// errors are never cached.
#[derive(Clone)]
pub struct ResolutionCache {
    inner: Arc<dyn Resolver>,
    state: Arc<Mutex<State>>,
    config: CacheConfig,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResolutionCache {
    pub fn new(inner: Arc<dyn Resolver>, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            state: Arc::new(Mutex::new(State {
                entries: LruCache::new(capacity),
                inflight: HashMap::new(),
                next_id: 0,
            })),
            config,
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Forget everything cached about `identifier`.
    ///
    /// Removes its own entries (both modes for a DID) and any entries in the
    /// other direction that point at it. A resolution already in flight for
    /// it keeps running for its current waiters but will not be stored.
    pub async fn invalidate(&self, identifier: &AtIdentifier) {
        let mut state = self.state.lock().await;

        let direct = match identifier {
            AtIdentifier::Handle(handle) => vec![CacheKey::Handle(handle.clone())],
            AtIdentifier::Did(did) => vec![
                CacheKey::Did(did.clone(), DidMode::DocumentOnly),
                CacheKey::Did(did.clone(), DidMode::Bidirectional),
            ],
        };
        for key in &direct {
            state.entries.pop(key);
            state.inflight.remove(key);
        }

        let related: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.mentions(identifier))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &related {
            state.entries.pop(key);
        }

        debug!(
            identifier = %identifier,
            related = related.len(),
            "invalidated cache entries"
        );
        self.reporter.report(Event::Invalidated);
    }

    /// Drop every entry and in-flight marker.
    pub async fn invalidate_all(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.inflight.clear();
        self.reporter.report(Event::Invalidated);
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn get(&self, key: CacheKey, deadline: &Deadline) -> Outcome {
        deadline.check()?;

        let resolution = {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_live(now) {
                    trace!(?key, "cache hit");
                    self.reporter.report(Event::CacheHit);
                    return entry.outcome.clone();
                }
            }
            // Expired entries are dropped eagerly so they do not count
            // toward capacity.
            state.entries.pop(&key);

            let joined = state.inflight.get(&key).and_then(|p| p.task.upgrade());
            match joined {
                Some(task) => {
                    trace!(?key, "joining in-flight resolution");
                    self.reporter.report(Event::Coalesced);
                    task
                }
                None => {
                    trace!(?key, "cache miss");
                    self.reporter.report(Event::CacheMiss);
                    let id = state.next_id;
                    state.next_id += 1;
                    let task = self.spawn_resolution(key.clone(), id);
                    if let Some(weak) = task.downgrade() {
                        state.inflight.insert(key, Pending { id, task: weak });
                    }
                    task
                }
            }
        };

        deadline.run(resolution).await?
    }

    /// The shared future for one resolution of `key`.
    ///
    /// It runs under its own deadline, so a caller giving up does not cut it
    /// short for the others.
    fn spawn_resolution(&self, key: CacheKey, id: u64) -> Shared<Resolution> {
        let inner = self.inner.clone();
        let config = self.config.clone();
        // Created outside the future so it also covers a future that is
        // dropped before its first poll.
        let guard = InflightGuard {
            state: self.state.clone(),
            key,
            id,
            settled: false,
        };

        async move {
            let mut guard = guard;
            let deadline = Deadline::after(config.resolve_timeout);
            let outcome = match &guard.key {
                CacheKey::Handle(handle) => inner.resolve_handle(handle, &deadline).await,
                CacheKey::Did(did, mode) => inner.resolve_did(did, *mode, &deadline).await,
            };
            settle(&guard.state, &guard.key, id, &outcome, &config).await;
            guard.settled = true;
            outcome
        }
        .boxed()
        .shared()
    }
}

/// Clears the in-flight marker of a resolution that every caller abandoned
/// before it settled.
struct InflightGuard {
    state: Arc<Mutex<State>>,
    key: CacheKey,
    id: u64,
    settled: bool,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Ok(mut state) = self.state.try_lock() {
            forget_pending(&mut state, &self.key, self.id);
            return;
        }
        // Lock is busy: finish the cleanup once it frees up.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let state = self.state.clone();
            let key = self.key.clone();
            let id = self.id;
            runtime.spawn(async move {
                forget_pending(&mut *state.lock().await, &key, id);
            });
        }
    }
}

/// Remove the marker for `key` if it still belongs to resolution `id`.
fn forget_pending(state: &mut State, key: &CacheKey, id: u64) {
    if state.inflight.get(key).is_some_and(|pending| pending.id == id) {
        trace!(?key, "dropping abandoned in-flight marker");
        state.inflight.remove(key);
    }
}

/// Store a finished resolution, unless it was invalidated or superseded
/// while it ran.
async fn settle(state: &Mutex<State>, key: &CacheKey, id: u64, outcome: &Outcome, config: &CacheConfig) {
    let mut state = state.lock().await;
    match state.inflight.get(key) {
        Some(pending) if pending.id == id => {
            state.inflight.remove(key);
        }
        _ => {
            trace!(?key, "discarding stale resolution");
            return;
        }
    }

    if let Some(ttl) = ttl_for(outcome, config) {
        state.entries.put(
            key.clone(),
            CacheEntry {
                outcome: outcome.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// How long an outcome may be served from memory, if at all.
fn ttl_for(outcome: &Outcome, config: &CacheConfig) -> Option<Duration> {
    match outcome {
        Ok(record) if record.status.is_positive() => Some(config.verified_ttl),
        Ok(_) => Some(config.negative_ttl),
        Err(err) if err.is_cacheable_failure() => Some(config.negative_ttl),
        Err(_) => None,
    }
}

#[async_trait]
impl Resolver for ResolutionCache {
    async fn resolve_handle(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        self.get(CacheKey::Handle(handle.clone()), deadline).await
    }

    async fn resolve_did(
        &self,
        did: &Did,
        mode: DidMode,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        self.get(CacheKey::Did(did.clone(), mode), deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CountingReporter;
    use crate::testing::{StaticResolver, record};
    use crate::{TransportError, VerificationStatus};
    use pretty_assertions::assert_eq;

    fn alice() -> Handle {
        Handle::parse("alice.example.com").unwrap()
    }

    fn abc() -> Did {
        Did::parse("did:plc:abc123").unwrap()
    }

    fn config() -> CacheConfig {
        CacheConfig::default()
    }

    fn cache(inner: &Arc<StaticResolver>) -> ResolutionCache {
        ResolutionCache::new(inner.clone(), config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_is_served_from_memory() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let reporter = Arc::new(CountingReporter::new());
        let cache = cache(&inner).with_reporter(reporter.clone());

        let first = cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        let second = cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls(), 1);
        let stats = reporter.snapshot();
        assert_eq!((stats.cache_misses, stats.cache_hits), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_resolution() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_millis(100)));
        inner.set_verified(&alice(), &abc());
        let reporter = Arc::new(CountingReporter::new());
        let cache = cache(&inner).with_reporter(reporter.clone());

        let calls = (0..10).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve_handle(&alice(), &Deadline::none()).await })
        });
        let results = futures_util::future::join_all(calls).await;

        for result in results {
            assert_eq!(result.unwrap().unwrap().did, abc());
        }
        assert_eq!(inner.calls(), 1);
        assert_eq!(reporter.snapshot().coalesced, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verified_entry_expires() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        tokio::time::advance(Duration::from_secs(59 * 60)).await;
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(inner.calls(), 1);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_uses_negative_ttl() {
        let inner = Arc::new(StaticResolver::new());
        let cache = cache(&inner);

        let err = cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap_err();
        assert!(err.is_handle_not_found());
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap_err();
        assert_eq!(inner.calls(), 1);

        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        inner.set_verified(&alice(), &abc());
        let rec = cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(rec.did, abc());
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_status_uses_negative_ttl() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_did(
            &abc(),
            Ok(record(&abc(), Some(&alice()), VerificationStatus::Mismatch)),
        );
        let cache = cache(&inner);

        cache
            .resolve_did(&abc(), DidMode::Bidirectional, &Deadline::none())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        cache
            .resolve_did(&abc(), DidMode::Bidirectional, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_not_cached() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_handle(
            &alice(),
            Err(IdentityError::Transport(TransportError::Dns("refused".into()))),
        );
        let cache = cache(&inner);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap_err();
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap_err();
        assert_eq!(inner.calls(), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_modes_are_cached_separately() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        cache
            .resolve_did(&abc(), DidMode::DocumentOnly, &Deadline::none())
            .await
            .unwrap();
        cache
            .resolve_did(&abc(), DidMode::Bidirectional, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(inner.calls(), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let inner = Arc::new(StaticResolver::new());
        let bob = Handle::parse("bob.example.com").unwrap();
        let carol = Handle::parse("carol.example.com").unwrap();
        let cache = ResolutionCache::new(inner.clone(), config().with_capacity(2));

        for handle in [&alice(), &bob, &carol] {
            cache.resolve_handle(handle, &Deadline::none()).await.unwrap_err();
        }
        assert_eq!(cache.len().await, 2);
        assert_eq!(inner.calls(), 3);

        // alice was least recently used and is gone; carol is still there.
        cache.resolve_handle(&carol, &Deadline::none()).await.unwrap_err();
        assert_eq!(inner.calls(), 3);
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap_err();
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fresh_resolution() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        cache.invalidate(&AtIdentifier::Handle(alice())).await;
        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_did_purges_handle_entries() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        cache
            .resolve_did(&abc(), DidMode::DocumentOnly, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);

        cache.invalidate(&AtIdentifier::Did(abc())).await;
        assert!(cache.is_empty().await);

        cache
            .resolve_did(&abc(), DidMode::DocumentOnly, &Deadline::none())
            .await
            .unwrap();
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_inflight_result_is_not_stored() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_secs(1)));
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve_handle(&alice(), &Deadline::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate(&AtIdentifier::Handle(alice())).await;

        // The first waiter still gets its answer.
        assert!(pending.await.unwrap().is_ok());
        assert!(cache.is_empty().await);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_cancelled_caller_does_not_fail_others() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_secs(1)));
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        let impatient = Deadline::none();
        let first = {
            let cache = cache.clone();
            let deadline = impatient.clone();
            tokio::spawn(async move { cache.resolve_handle(&alice(), &deadline).await })
        };
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve_handle(&alice(), &Deadline::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        impatient.cancel();

        assert!(first.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(second.await.unwrap().unwrap().did, abc());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_resolution_restarts() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_secs(1)));
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        let err = cache
            .resolve_handle(&alice(), &Deadline::after(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err, IdentityError::Transport(TransportError::Timeout));

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_resolutions_leave_no_markers() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_secs(1)));
        let cache = cache(&inner);

        for i in 0..50 {
            let handle = Handle::parse(&format!("user{i}.example.com")).unwrap();
            let err = cache
                .resolve_handle(&handle, &Deadline::after(Duration::from_millis(10)))
                .await
                .unwrap_err();
            assert_eq!(err, IdentityError::Transport(TransportError::Timeout));
        }

        assert_eq!(inner.calls(), 50);
        assert_eq!(cache.state.lock().await.inflight.len(), 0);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_marker_does_not_clear_newer_resolution() {
        let inner = Arc::new(StaticResolver::new().with_delay(Duration::from_secs(1)));
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);
        let key = CacheKey::Handle(alice());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve_handle(&alice(), &Deadline::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut state = cache.state.lock().await;
        let current = state.inflight.get(&key).map(|p| p.id).unwrap();
        forget_pending(&mut state, &key, current + 1);
        assert!(state.inflight.contains_key(&key));
        drop(state);

        assert!(pending.await.unwrap().is_ok());
        assert_eq!(cache.state.lock().await.inflight.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all() {
        let inner = Arc::new(StaticResolver::new());
        inner.set_verified(&alice(), &abc());
        let cache = cache(&inner);

        cache.resolve_handle(&alice(), &Deadline::none()).await.unwrap();
        cache.invalidate_all().await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_ttl_policy() {
        let config = config();
        let did = abc();
        let positive = Ok(record(&did, None, VerificationStatus::UnverifiedClaim));
        let negative = Ok(record(&did, None, VerificationStatus::NotFound));
        let too_large = Err(IdentityError::TooLarge {
            limit: 2048,
            actual: None,
        });

        assert_eq!(ttl_for(&positive, &config), Some(config.verified_ttl));
        assert_eq!(ttl_for(&negative, &config), Some(config.negative_ttl));
        assert_eq!(ttl_for(&too_large, &config), None);
    }
}
