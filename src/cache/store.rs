// kyc-realtime-kit/src/cache/store.rs
use crate::cache::key::ScopeKey;
use anyhow::{Error, anyhow};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use std::{
    any::Any,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::timeout;
use tracing::{debug, error, info_span, instrument, warn, Instrument};

// --- Type Aliases ---

/// A type-erased cached value. Reads downcast it back to the caller's type.
type AnyValue = Arc<dyn Any + Send + Sync>;

/// The outcome of one fetch, cheap to clone for every coalesced reader.
type FetchResult = Result<AnyValue, Arc<Error>>;

/// A cloneable, shareable fetch future. Every reader of the same key while
/// the fetch runs awaits this one future.
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

// --- State ---

enum Slot {
    Ready { value: AnyValue, stale: bool },
    Failed { error: Arc<Error> },
}

struct InFlight {
    fetch: SharedFetch,
    /// Set when the key is invalidated while the fetch runs; the result then
    /// lands stale.
    invalidated: Arc<AtomicBool>,
    /// The cache generation the fetch started in.
    generation: u64,
}

/// What a key currently holds, without triggering a fetch.
#[derive(Debug)]
pub enum QueryState<T> {
    Missing,
    Fresh(Arc<T>),
    /// Invalidated; the next read refetches.
    Stale(Arc<T>),
    /// The last fetch failed; the next read refetches.
    Failed(Arc<Error>),
}

// --- Statistics ---

/// Statistics for monitoring the query cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a fresh entry.
    pub hits: usize,
    /// Fetches started (first reader of a key that was not fresh).
    pub fetches: usize,
    /// Reads that joined a fetch already in flight.
    pub coalesced_reads: usize,
    /// Fetches that failed (excluding timeouts).
    pub failed_fetches: usize,
    /// Fetches that timed out.
    pub timed_out_fetches: usize,
    /// Calls to `invalidate`.
    pub invalidations: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    fetches: AtomicUsize,
    coalesced_reads: AtomicUsize,
    failed_fetches: AtomicUsize,
    timed_out_fetches: AtomicUsize,
    invalidations: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced_reads: self.coalesced_reads.load(Ordering::Relaxed),
            failed_fetches: self.failed_fetches.load(Ordering::Relaxed),
            timed_out_fetches: self.timed_out_fetches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

// --- Invalidation seam ---

/// The one operation the cache coordinator needs from a query store.
pub trait Invalidate: Send + Sync {
    /// Marks everything under `key` stale. Unknown keys are a no-op. Returns
    /// how many entries and in-flight fetches were touched.
    fn invalidate(&self, key: &ScopeKey) -> usize;
}

// --- Cache Implementation ---

/// A client-side query cache keyed by [`ScopeKey`].
///
/// Reads of a fresh key return the cached value; stale, failed or missing
/// keys are fetched, and concurrent readers of one key share a single fetch.
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<DashMap<ScopeKey, Slot>>,
    in_flight: Arc<DashMap<ScopeKey, InFlight>>,
    /// Optional timeout applied to every fetch this cache starts.
    timeout: Option<Duration>,
    /// Bumped by `clear`. A fetch only stores its result if the generation
    /// is unchanged when it lands.
    generation: Arc<AtomicU64>,
    counters: Arc<Counters>,
}

impl QueryCache {
    /// Create a cache whose fetches run without a timeout.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            timeout: None,
            generation: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create a cache whose fetches fail once they run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new()
        }
    }

    /// Reads `key`, fetching it with `fetch` unless a fresh value is cached.
    ///
    /// `fetch` is only called when no fetch for `key` is already running;
    /// otherwise this read waits for that one.
    #[instrument(skip(self, key, fetch), fields(key = %key))]
    pub async fn read<T, F, Fut>(&self, key: ScopeKey, fetch: F) -> Result<Arc<T>, Arc<Error>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if let Some(value) = self.fresh_value(&key) {
            debug!("Cache hit.");
            Counters::bump(&self.counters.hits);
            return downcast(value, &key);
        }

        let pending = self.join_or_start(key.clone(), fetch);
        let value = pending.await?;
        downcast(value, &key)
    }

    /// The current state of `key`. Never fetches.
    pub fn peek<T>(&self, key: &ScopeKey) -> QueryState<T>
    where
        T: Send + Sync + 'static,
    {
        let Some(slot) = self.entries.get(key) else {
            return QueryState::Missing;
        };
        match slot.value() {
            Slot::Ready { value, stale } => match Arc::clone(value).downcast::<T>() {
                Ok(typed) if *stale => QueryState::Stale(typed),
                Ok(typed) => QueryState::Fresh(typed),
                Err(_) => QueryState::Missing,
            },
            Slot::Failed { error } => QueryState::Failed(Arc::clone(error)),
        }
    }

    /// Drops every entry and forgets running fetches. Used on logout.
    ///
    /// Readers already awaiting a running fetch still get its result, but
    /// the result is not stored and the next read fetches again.
    pub fn clear(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.clear();
        self.in_flight.clear();
        debug!(generation, "Query cache cleared.");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a snapshot of the current statistics.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Get the number of keys whose fetches are currently in flight.
    pub fn pending_fetches(&self) -> usize {
        self.in_flight.len()
    }

    fn fresh_value(&self, key: &ScopeKey) -> Option<AnyValue> {
        match self.entries.get(key)?.value() {
            Slot::Ready { value, stale: false } => Some(Arc::clone(value)),
            _ => None,
        }
    }

    fn join_or_start<T, F, Fut>(&self, key: ScopeKey, fetch: F) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!("Read coalesced, joining running fetch.");
                Counters::bump(&self.counters.coalesced_reads);
                existing.get().fetch.clone()
            }
            Entry::Vacant(vacant) => {
                debug!("Starting fetch.");
                Counters::bump(&self.counters.fetches);

                let invalidated = Arc::new(AtomicBool::new(false));
                let entries = Arc::clone(&self.entries);
                let in_flight = Arc::clone(&self.in_flight);
                let counters = Arc::clone(&self.counters);
                let flag = Arc::clone(&invalidated);
                let generation = Arc::clone(&self.generation);
                let started = generation.load(Ordering::SeqCst);
                let fetch_timeout = self.timeout;
                let span = info_span!("query_fetch", key = %key);

                // Runs once, however many readers await it.
                let shared = async move {
                    let (outcome, timed_out): (Result<T, Error>, bool) = match fetch_timeout {
                        Some(limit) => match timeout(limit, fetch()).await {
                            Ok(result) => (result, false),
                            Err(_) => {
                                warn!("Fetch timed out after {:?}", limit);
                                Counters::bump(&counters.timed_out_fetches);
                                (Err(anyhow!("fetch timed out after {:?} for {}", limit, key)), true)
                            }
                        },
                        None => (fetch().await, false),
                    };

                    let (result, slot): (FetchResult, Slot) = match outcome {
                        Ok(value) => {
                            let value: AnyValue = Arc::new(value);
                            let stale = flag.load(Ordering::SeqCst);
                            (Ok(Arc::clone(&value)), Slot::Ready { value, stale })
                        }
                        Err(e) => {
                            if !timed_out {
                                error!("Fetch failed: {:?}", e);
                                Counters::bump(&counters.failed_fetches);
                            }
                            let e = Arc::new(e);
                            (Err(Arc::clone(&e)), Slot::Failed { error: e })
                        }
                    };

                    // The entry guard holds the shard lock, so a `clear` cannot
                    // slip in between the generation check and the insert.
                    let stored = {
                        let entry = entries.entry(key.clone());
                        if generation.load(Ordering::SeqCst) == started {
                            entry.insert(slot);
                            true
                        } else {
                            false
                        }
                    };
                    if !stored {
                        debug!("Cache cleared during fetch, result discarded.");
                    }

                    in_flight.remove_if(&key, |_, flight| flight.generation == started);
                    // An invalidation that raced the insert above only reached the flag.
                    if stored && flag.load(Ordering::SeqCst) {
                        if let Some(mut slot) = entries.get_mut(&key) {
                            if let Slot::Ready { stale, .. } = slot.value_mut() {
                                *stale = true;
                            }
                        }
                    }
                    result
                }
                .instrument(span)
                .boxed()
                .shared();

                vacant.insert(InFlight {
                    fetch: shared.clone(),
                    invalidated,
                    generation: started,
                });
                shared
            }
        }
    }
}

impl Invalidate for QueryCache {
    fn invalidate(&self, key: &ScopeKey) -> usize {
        Counters::bump(&self.counters.invalidations);
        let mut touched = 0;

        for mut entry in self.entries.iter_mut() {
            if !key.covers(entry.key()) {
                continue;
            }
            if let Slot::Ready { stale, .. } = entry.value_mut() {
                *stale = true;
            }
            touched += 1;
        }

        for flight in self.in_flight.iter() {
            if key.covers(flight.key()) {
                flight.invalidated.store(true, Ordering::SeqCst);
                touched += 1;
            }
        }

        debug!(%key, touched, "Invalidated cache scope.");
        touched
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn downcast<T>(value: AnyValue, key: &ScopeKey) -> Result<Arc<T>, Arc<Error>>
where
    T: Send + Sync + 'static,
{
    value.downcast::<T>().map_err(|_| {
        Arc::new(anyhow!(
            "cached value for {} is not a {}",
            key,
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_tracing;
    use tokio::time::sleep;

    fn admin() -> ScopeKey {
        ScopeKey::kyc().child("admin")
    }

    fn client() -> ScopeKey {
        ScopeKey::kyc().child("client")
    }

    // Simulate a REST read that counts how often it runs.
    async fn simulate_fetch(label: String, calls: Arc<AtomicUsize>) -> Result<String, Error> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(Duration::from_millis(20)).await;
        if label == "fail" {
            Err(anyhow!("Failed to fetch {}", label))
        } else {
            Ok(format!("{label}#{n}"))
        }
    }

    async fn read_counted(
        cache: &QueryCache,
        key: ScopeKey,
        label: &str,
        calls: &Arc<AtomicUsize>,
    ) -> Result<Arc<String>, Arc<Error>> {
        let label = label.to_owned();
        let calls = Arc::clone(calls);
        cache.read(key, move || simulate_fetch(label, calls)).await
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                read_counted(&cache, admin(), "list", &calls).await
            }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), "list#1");
        }

        let stats = cache.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.coalesced_reads, 4);
        assert_eq!(cache.pending_fetches(), 0);

        // A fresh entry is served without fetching.
        assert_eq!(*read_counted(&cache, admin(), "list", &calls).await.unwrap(), "list#1");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn coarse_invalidation_refetches_nested_key_exactly_once() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let entity = client().child("X");

        read_counted(&cache, entity.clone(), "x", &calls).await.unwrap();
        assert_eq!(cache.invalidate(&client()), 1);
        assert!(matches!(cache.peek::<String>(&entity), QueryState::Stale(_)));

        let refreshed = read_counted(&cache, entity.clone(), "x", &calls).await.unwrap();
        read_counted(&cache, entity.clone(), "x", &calls).await.unwrap();

        assert_eq!(*refreshed, "x#2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entity_invalidation_leaves_siblings_fresh() {
        init_tracing();
        let cache = QueryCache::new();
        let x_calls = Arc::new(AtomicUsize::new(0));
        let y_calls = Arc::new(AtomicUsize::new(0));
        let x = client().child("X");
        let y = client().child("Y");

        read_counted(&cache, x.clone(), "x", &x_calls).await.unwrap();
        read_counted(&cache, y.clone(), "y", &y_calls).await.unwrap();

        cache.invalidate(&x);
        read_counted(&cache, y.clone(), "y", &y_calls).await.unwrap();

        assert!(matches!(cache.peek::<String>(&x), QueryState::Stale(_)));
        assert!(matches!(cache.peek::<String>(&y), QueryState::Fresh(_)));
        assert_eq!(y_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidating_unknown_keys_is_a_no_op() {
        init_tracing();
        let cache = QueryCache::new();

        assert_eq!(cache.invalidate(&admin().child("nobody")), 0);
        assert_eq!(cache.invalidate(&admin().child("nobody")), 0);
        assert!(cache.is_empty());
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Missing));
    }

    #[tokio::test]
    async fn invalidation_during_fetch_lands_stale() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let reader = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { read_counted(&cache, admin(), "list", &calls).await })
        };
        while cache.pending_fetches() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.invalidate(&ScopeKey::kyc()), 1);

        assert_eq!(*reader.await.unwrap().unwrap(), "list#1");
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Stale(_)));
        assert_eq!(*read_counted(&cache, admin(), "list", &calls).await.unwrap(), "list#2");
    }

    #[tokio::test]
    async fn clear_during_fetch_discards_the_result() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let reader = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { read_counted(&cache, admin(), "list", &calls).await })
        };
        while cache.pending_fetches() == 0 {
            tokio::task::yield_now().await;
        }
        cache.clear();
        assert_eq!(cache.pending_fetches(), 0);

        // The reader that was waiting still gets its answer.
        assert_eq!(*reader.await.unwrap().unwrap(), "list#1");
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Missing));
        assert!(cache.is_empty());

        assert_eq!(*read_counted(&cache, admin(), "list", &calls).await.unwrap(), "list#2");
        assert_eq!(cache.stats().fetches, 2);
    }

    #[tokio::test]
    async fn fetch_from_before_clear_leaves_the_next_fetch_alone() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let old = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { read_counted(&cache, admin(), "list", &calls).await })
        };
        while cache.pending_fetches() == 0 {
            tokio::task::yield_now().await;
        }
        cache.clear();

        // A read after the clear starts its own fetch instead of joining the old one.
        let release = Arc::new(tokio::sync::Notify::new());
        let new = {
            let cache = cache.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                cache
                    .read(admin(), move || async move {
                        release.notified().await;
                        Ok::<_, Error>("after clear".to_string())
                    })
                    .await
            })
        };
        while cache.pending_fetches() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*old.await.unwrap().unwrap(), "list#1");
        // The old fetch finishing must not drop the new fetch's record.
        assert_eq!(cache.pending_fetches(), 1);
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Missing));

        release.notify_one();
        assert_eq!(*new.await.unwrap().unwrap(), "after clear");
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Fresh(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_shared_and_retried_on_next_read() {
        init_tracing();
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            read_counted(&cache, admin(), "fail", &calls),
            read_counted(&cache, admin(), "fail", &calls),
        );
        let message = a.unwrap_err().to_string();
        assert!(message.contains("Failed to fetch fail"), "{message}");
        assert!(b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(cache.peek::<String>(&admin()), QueryState::Failed(_)));

        read_counted(&cache, admin(), "fail", &calls).await.unwrap_err();
        let stats = cache.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.failed_fetches, 2);
    }

    #[tokio::test]
    async fn slow_fetches_time_out() {
        init_tracing();
        let cache = QueryCache::with_timeout(Duration::from_millis(5));

        let result = cache
            .read(admin(), || async {
                sleep(Duration::from_millis(100)).await;
                Ok::<_, Error>("too late".to_string())
            })
            .await;

        let message = result.unwrap_err().to_string();
        assert!(message.contains("timed out"), "{message}");
        assert!(message.contains("(kyc, admin)"), "{message}");
        let stats = cache.stats();
        assert_eq!(stats.timed_out_fetches, 1);
        assert_eq!(stats.failed_fetches, 0);
        assert_eq!(cache.pending_fetches(), 0);
    }

    #[tokio::test]
    async fn reading_with_the_wrong_type_reports_an_error() {
        init_tracing();
        let cache = QueryCache::new();
        cache
            .read(admin(), || async { Ok::<_, Error>(7_u32) })
            .await
            .unwrap();

        let wrong = cache
            .read(admin(), || async { Ok::<_, Error>("never".to_string()) })
            .await;
        assert!(wrong.is_err());
    }
}
