//! Cache Store Module
//!
//! Main cache engine combining a key index and a recency list with TTL
//! expiration, size-bounded eviction and single-flight computation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::entry::{Computed, Entry, Expiry};
use crate::cache::flight::Flight;
use crate::cache::lru::RecencyList;
use crate::cache::CacheStats;
use crate::error::{CacheError, Result};

// == Cache ==
/// Size-bounded LRU cache with TTL expiry and at-most-once computation per key.
///
/// A single lock guards the index, the list and the counters. It is never
/// held while a compute closure runs or while a caller waits on someone
/// else's computation.
#[derive(Debug)]
pub struct Cache<V> {
    inner: Mutex<Inner<V>>,
    /// Maximum total size of resident entries
    budget: usize,
}

#[derive(Debug)]
struct Inner<V> {
    /// Key to arena slot
    index: HashMap<String, usize>,
    list: RecencyList<V>,
    /// Sum of `size` over every indexed entry
    used: usize,
    stats: CacheStats,
}

/// What a caller does after the locked lookup.
enum Lookup<V> {
    Hit(V),
    Wait(Arc<Flight<V>>),
    Lead(usize),
}

impl<V> Cache<V> {
    // == Constructor ==
    /// Creates an empty cache holding at most `budget` size units.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                list: RecencyList::new(),
                used: 0,
                stats: CacheStats::new(budget),
            }),
            budget,
        }
    }

    // == Delete ==
    /// Removes the entry for `key` and reports whether it was present.
    ///
    /// # Panics
    /// If the key's computation is still in flight. Deleting an entry other
    /// callers are waiting on breaks the single-flight contract.
    pub fn del(&self, key: &str) -> bool {
        match self.try_del(key) {
            Ok(present) => present,
            Err(_) => panic!("deleting '{key}' while its computation is in flight"),
        }
    }

    // == Try Delete ==
    /// Like [`del`](Self::del), but reports an in-flight computation as
    /// [`CacheError::InFlight`] and leaves it untouched.
    ///
    /// For callers such as an admin endpoint that cannot know whether the
    /// key is being computed.
    pub fn try_del(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(&slot) = inner.index.get(key) else {
            return Ok(false);
        };
        if inner.list.entry(slot).is_pending() {
            return Err(CacheError::InFlight {
                key: key.to_string(),
            });
        }

        inner.evict(slot);
        debug!(key, "entry deleted");

        #[cfg(test)]
        inner.verify();
        Ok(true)
    }

    // == Keys ==
    /// Visits every live entry after purging stale ones, and returns the
    /// number of stale entries purged.
    ///
    /// This is a maintenance pass: it holds the lock for its whole duration
    /// and runs the full consistency check, panicking on any corruption.
    /// Pending entries are not visited. `visit` must not call back into
    /// this cache. Iteration order is unspecified.
    pub fn keys<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&str, &V),
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        let stale: Vec<usize> = inner
            .index
            .values()
            .copied()
            .filter(|&slot| inner.list.entry(slot).is_stale(now))
            .collect();
        let purged = stale.len();
        for slot in stale {
            debug!(key = %inner.list.entry(slot).key, "entry expired");
            inner.evict(slot);
            inner.stats.record_expiration();
        }

        let used = inner.verify();
        let mut visited = 0;
        for (key, &slot) in &inner.index {
            let entry = inner.list.entry(slot);
            if let Some(value) = &entry.value {
                visit(key, value);
                visited += entry.size;
            }
        }
        assert_eq!(
            visited, used,
            "visited sizes ({visited}) disagree with used memory ({used})"
        );
        purged
    }

    // == Stats ==
    /// Returns a snapshot of the counters and memory accounting.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.total_entries = inner.index.len();
        stats.used = inner.used;
        stats
    }

    /// Number of indexed entries, pending ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of resident entries.
    pub fn used(&self) -> usize {
        self.inner.lock().used
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    // == Abandon ==
    /// Drops a pending placeholder whose computation produced no value and
    /// hands `err` to every caller waiting on it.
    fn abandon(&self, key: &str, slot: usize, err: CacheError) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entry = inner.list.entry_mut(slot);
        assert!(
            entry.key == key && entry.is_pending(),
            "slot {slot} no longer holds the pending entry for '{key}'"
        );
        entry.waiting = 0;
        let flight = entry.flight.take();

        inner.evict(slot);
        inner.stats.record_failure();
        if let Some(flight) = flight {
            flight.resolve(Err(err));
        }

        #[cfg(test)]
        inner.verify();
    }
}

impl<V: Clone> Cache<V> {
    // == Get ==
    /// Returns the live value for `key`, computing it if absent or stale.
    ///
    /// Concurrent callers for the same missing key share one invocation of
    /// `compute`: the first runs it, the rest block until it finishes and
    /// receive the same value, or the same error if it fails or panics.
    /// A failed computation is not cached.
    ///
    /// `compute` runs without the cache lock and must not call back into
    /// this cache.
    pub fn get<F>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> anyhow::Result<Computed<V>>,
    {
        let slot = match self.lookup(key) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Wait(flight) => return flight.wait(),
            Lookup::Lead(slot) => slot,
        };

        let guard = LeaderGuard {
            cache: self,
            key,
            slot,
            armed: true,
        };
        let outcome = compute();
        guard.complete(outcome)
    }

    // == Get Async ==
    /// Async form of [`get`](Self::get) for callers on an async runtime.
    ///
    /// Joining callers await the computation without holding a thread, and
    /// the leader awaits `compute` in place. If the leader's future is
    /// dropped before `compute` finishes, every waiter receives
    /// [`CacheError::ComputeCancelled`] and nothing is cached.
    pub async fn get_async<F, Fut>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Computed<V>>>,
    {
        let slot = match self.lookup(key) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Wait(flight) => return flight.wait_async().await,
            Lookup::Lead(slot) => slot,
        };

        let guard = LeaderGuard {
            cache: self,
            key,
            slot,
            armed: true,
        };
        let outcome = compute().await;
        guard.complete(outcome)
    }

    // == Lookup ==
    /// Resolves `key` under the lock: a fresh hit, a computation to join, or
    /// a new pending placeholder this caller must fill.
    fn lookup(&self, key: &str) -> Lookup<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        if let Some(&slot) = inner.index.get(key) {
            let entry = inner.list.entry_mut(slot);

            if let Some(flight) = &entry.flight {
                let flight = Arc::clone(flight);
                entry.waiting += 1;
                trace!(key, waiting = entry.waiting, "joining computation in flight");
                inner.stats.record_coalesced();
                return Lookup::Wait(flight);
            }

            if entry.is_stale(now) {
                debug!(key, "entry expired");
                inner.evict(slot);
                inner.stats.record_expiration();
            } else {
                let Some(value) = entry.value.clone() else {
                    panic!("resident entry '{key}' has no value");
                };
                inner.list.move_to_front(slot);
                inner.stats.record_hit();
                trace!(key, "cache hit");
                return Lookup::Hit(value);
            }
        }

        // Absent or just expired: the lock has been held since the index
        // lookup, so no other caller can have inserted a placeholder.
        inner.stats.record_miss();
        let flight = Arc::new(Flight::new());
        let slot = inner.list.alloc(Entry::pending(key.to_string(), flight));
        inner.index.insert(key.to_string(), slot);
        trace!(key, slot, "cache miss, computing");

        #[cfg(test)]
        inner.verify();
        Lookup::Lead(slot)
    }

    // == Publish ==
    /// Finalizes a pending entry with its computed value, links it as most
    /// recently used, wakes its waiters and runs the eviction sweep.
    fn publish(&self, key: &str, slot: usize, computed: Computed<V>) -> V {
        let Computed { value, ttl, size } = computed;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entry = inner.list.entry_mut(slot);
        assert!(
            entry.key == key && entry.is_pending(),
            "slot {slot} no longer holds the pending entry for '{key}'"
        );
        // The leader stops waiting; everyone else is served through the flight.
        entry.waiting -= 1;
        let waiters = std::mem::take(&mut entry.waiting);
        entry.value = Some(value.clone());
        entry.expiry = Expiry::from_ttl(Instant::now(), ttl);
        entry.size = size;
        let flight = entry.flight.take();

        inner.list.push_front(slot);
        inner.used += size;
        if let Some(flight) = flight {
            flight.resolve(Ok(value.clone()));
        }
        trace!(key, size, waiters, "computation published");

        inner.sweep(self.budget);

        #[cfg(test)]
        inner.verify();
        value
    }
}

impl<V> Inner<V> {
    // == Evict Entry ==
    /// Unlinks `slot` if linked, drops it from the index and releases its
    /// size from the accounting.
    ///
    /// # Panics
    /// If any caller is still waiting on the entry.
    fn evict(&mut self, slot: usize) {
        let entry = self.list.entry(slot);
        assert_eq!(
            entry.waiting, 0,
            "evicting '{}' while {} caller(s) wait on it",
            entry.key, entry.waiting
        );
        if entry.linked {
            self.list.unlink(slot);
        }

        let entry = self.list.release(slot);
        match self.index.remove(&entry.key) {
            Some(indexed) if indexed == slot => {}
            other => panic!(
                "index maps '{}' to {:?}, but the entry lives in slot {slot}",
                entry.key, other
            ),
        }
        self.used = self.used.checked_sub(entry.size).unwrap_or_else(|| {
            panic!(
                "used memory {} is smaller than the size {} of '{}'",
                self.used, entry.size, entry.key
            )
        });
    }

    // == Eviction Sweep ==
    /// Walks from the least recently used end while over budget, evicting
    /// every candidate that is not waited on and not a fresh zero-size entry.
    ///
    /// Each node is visited at most once, so the budget may still be
    /// exceeded when enough candidates are protected.
    fn sweep(&mut self, budget: usize) {
        let now = Instant::now();
        let mut cursor = self.list.tail();

        while self.used > budget {
            let Some(slot) = cursor else {
                break;
            };
            let entry = self.list.entry(slot);
            cursor = entry.prev;

            if entry.waiting > 0 {
                continue;
            }
            if entry.size == 0 && !entry.is_stale(now) {
                continue;
            }

            debug!(key = %entry.key, size = entry.size, "evicting entry");
            self.evict(slot);
            self.stats.record_eviction();
        }

        if self.used > budget {
            warn!(used = self.used, budget, "eviction sweep finished over budget");
        }
    }

    // == Consistency Check ==
    /// Verifies index/list agreement, link symmetry and memory accounting.
    /// Returns the sum of entry sizes.
    ///
    /// # Panics
    /// On the first violated invariant.
    fn verify(&self) -> usize {
        let mut total = 0;
        let mut linked = 0;

        for (key, &slot) in &self.index {
            let entry = self.list.entry(slot);
            assert_eq!(&entry.key, key, "index key '{key}' maps to entry '{}'", entry.key);
            assert_eq!(
                entry.is_pending(),
                entry.flight.is_some(),
                "entry '{key}' has a flight that does not match its expiry"
            );

            if entry.is_pending() {
                assert!(
                    !entry.linked && entry.size == 0 && entry.value.is_none(),
                    "pending entry '{key}' is linked, sized or valued"
                );
                continue;
            }

            assert!(entry.linked, "resident entry '{key}' is not linked");
            assert_eq!(entry.waiting, 0, "resident entry '{key}' has waiters");
            match entry.prev {
                Some(prev) => assert_eq!(
                    self.list.entry(prev).next,
                    Some(slot),
                    "backward link of '{key}' is not mirrored"
                ),
                None => assert_eq!(self.list.head(), Some(slot), "'{key}' has no prev but is not head"),
            }
            match entry.next {
                Some(next) => assert_eq!(
                    self.list.entry(next).prev,
                    Some(slot),
                    "forward link of '{key}' is not mirrored"
                ),
                None => assert_eq!(self.list.tail(), Some(slot), "'{key}' has no next but is not tail"),
            }

            total += entry.size;
            linked += 1;
        }

        assert_eq!(linked, self.list.len(), "list length disagrees with index");
        if let Some(head) = self.list.head() {
            assert!(self.list.entry(head).prev.is_none(), "head has a backward link");
        }
        if let Some(tail) = self.list.tail() {
            assert!(self.list.entry(tail).next.is_none(), "tail has a forward link");
        }

        let mut walked = 0;
        let mut cursor = self.list.head();
        while let Some(slot) = cursor {
            let entry = self.list.entry(slot);
            assert_eq!(
                self.index.get(&entry.key),
                Some(&slot),
                "listed entry '{}' is not indexed",
                entry.key
            );
            walked += 1;
            assert!(walked <= linked, "recency list contains a cycle");
            cursor = entry.next;
        }
        assert_eq!(walked, linked, "recency list is shorter than the index");

        assert_eq!(total, self.used, "used memory disagrees with entry sizes");
        total
    }
}

// == Leader Guard ==
/// Owned by the caller that runs a computation. If the computation unwinds
/// or its future is dropped, dropping the guard releases the placeholder and
/// fails every waiter instead of leaving them parked.
struct LeaderGuard<'a, V> {
    cache: &'a Cache<V>,
    key: &'a str,
    slot: usize,
    armed: bool,
}

impl<V: Clone> LeaderGuard<'_, V> {
    fn complete(mut self, outcome: anyhow::Result<Computed<V>>) -> Result<V> {
        self.armed = false;
        match outcome {
            Ok(computed) => Ok(self.cache.publish(self.key, self.slot, computed)),
            Err(cause) => {
                let err = CacheError::compute_failed(self.key, cause);
                warn!(key = self.key, error = %err, "computation failed");
                self.cache.abandon(self.key, self.slot, err.clone());
                Err(err)
            }
        }
    }
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let key = self.key.to_string();
        let err = if std::thread::panicking() {
            warn!(key = self.key, "computation panicked");
            CacheError::ComputePanicked { key }
        } else {
            warn!(key = self.key, "computation cancelled");
            CacheError::ComputeCancelled { key }
        };
        self.cache.abandon(self.key, self.slot, err);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread::{self, sleep};
    use std::time::Duration;

    const LONG_TTL: Duration = Duration::from_secs(300);

    fn value(v: &str, size: usize) -> impl FnOnce() -> anyhow::Result<Computed<String>> {
        let v = v.to_string();
        move || Ok(Computed::new(v, LONG_TTL, size))
    }

    fn unreachable_compute() -> anyhow::Result<Computed<String>> {
        panic!("compute should not be called")
    }

    fn resident_keys(cache: &Cache<String>) -> HashSet<String> {
        let mut keys = HashSet::new();
        cache.keys(|key, _| {
            keys.insert(key.to_string());
        });
        keys
    }

    fn wait_for_coalesced(cache: &Cache<String>, expected: u64) {
        while cache.stats().coalesced < expected {
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_store_new() {
        let cache: Cache<String> = Cache::new(100);
        assert!(cache.is_empty());
        assert_eq!(cache.used(), 0);
        assert_eq!(cache.budget(), 100);
    }

    #[test]
    fn test_cold_miss_computes_once() {
        let cache = Cache::new(123);
        let calls = AtomicUsize::new(0);

        let result = cache
            .get("foo", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Computed::new("bar".to_string(), LONG_TTL, 3))
            })
            .unwrap();

        assert_eq!(result, "bar");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.used(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_warm_hit_skips_compute() {
        let cache = Cache::new(100);

        cache.get("k", value("first", 5)).unwrap();
        let result = cache.get("k", unreachable_compute).unwrap();

        assert_eq!(result, "first");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_store_ttl_expiration() {
        let cache = Cache::new(100);

        cache
            .get("k", || Ok(Computed::new("old".to_string(), Duration::from_millis(50), 5)))
            .unwrap();
        assert_eq!(cache.get("k", unreachable_compute).unwrap(), "old");

        sleep(Duration::from_millis(80));

        let result = cache.get("k", value("new", 7)).unwrap();
        assert_eq!(result, "new");
        assert_eq!(cache.used(), 7);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_zero_ttl_recomputes_on_next_access() {
        let cache = Cache::new(100);

        cache
            .get("k", || Ok(Computed::new("a".to_string(), Duration::ZERO, 1)))
            .unwrap();
        let result = cache.get("k", value("b", 1)).unwrap();

        assert_eq!(result, "b");
    }

    #[test]
    fn test_never_expiring_entry() {
        let cache = Cache::new(100);

        cache
            .get("k", || Ok(Computed::forever("kept".to_string(), 1)))
            .unwrap();
        sleep(Duration::from_millis(20));

        assert_eq!(cache.get("k", unreachable_compute).unwrap(), "kept");
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let cache = Cache::new(100);

        cache.get("a", value("A", 30)).unwrap();
        cache.get("b", value("B", 30)).unwrap();
        cache.get("c", value("C", 30)).unwrap();

        // Access 'a' to make it most recently used
        cache.get("a", unreachable_compute).unwrap();
        assert_eq!(
            cache.inner.lock().list.keys_mru_first(),
            vec!["a", "c", "b"]
        );

        // Adding 'd' pushes used to 120, 'b' is now the oldest
        cache.get("d", value("D", 30)).unwrap();

        let keys = resident_keys(&cache);
        assert!(keys.contains("a"));
        assert!(!keys.contains("b"));
        assert_eq!(cache.used(), 90);
    }

    #[test]
    fn test_budget_enforcement() {
        let cache = Cache::new(100);

        cache.get("a", value("A", 60)).unwrap();
        assert_eq!(cache.used(), 60);

        cache.get("b", value("B", 60)).unwrap();
        assert_eq!(cache.used(), 60);
        assert_eq!(resident_keys(&cache), HashSet::from(["b".to_string()]));
        assert_eq!(cache.stats().evictions, 1);

        let calls = AtomicUsize::new(0);
        cache
            .get("a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Computed::new("A2".to_string(), LONG_TTL, 60))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_oversized_entry_is_returned_but_not_kept() {
        let cache = Cache::new(10);

        let result = cache.get("big", value("huge", 20)).unwrap();

        assert_eq!(result, "huge");
        assert!(cache.is_empty());
        assert_eq!(cache.used(), 0);
    }

    #[test]
    fn test_sweep_skips_fresh_zero_size_entries() {
        let cache = Cache::new(10);

        cache.get("z", value("Z", 0)).unwrap();
        cache.get("a", value("A", 8)).unwrap();
        cache.get("b", value("B", 8)).unwrap();

        // 'z' is least recently used but costs nothing, so 'a' goes instead
        assert_eq!(
            resident_keys(&cache),
            HashSet::from(["z".to_string(), "b".to_string()])
        );
        assert_eq!(cache.used(), 8);
    }

    #[test]
    fn test_sweep_evicts_stale_zero_size_entries() {
        let cache = Cache::new(10);

        cache
            .get("z", || Ok(Computed::new("Z".to_string(), Duration::ZERO, 0)))
            .unwrap();
        cache.get("a", value("A", 8)).unwrap();
        cache.get("b", value("B", 8)).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_store_delete() {
        let cache = Cache::new(100);

        assert!(!cache.del("missing"));

        cache.get("present", value("v1", 4)).unwrap();
        assert!(cache.del("present"));
        assert!(cache.is_empty());
        assert_eq!(cache.used(), 0);

        let result = cache.get("present", value("v2", 4)).unwrap();
        assert_eq!(result, "v2");
    }

    #[test]
    fn test_keys_purges_stale_and_visits_live() {
        let cache = Cache::new(100);

        cache
            .get("short", || Ok(Computed::new("s".to_string(), Duration::from_millis(30), 10)))
            .unwrap();
        cache.get("long", value("l", 20)).unwrap();
        cache.get("forever", || Ok(Computed::forever("f".to_string(), 5))).unwrap();

        sleep(Duration::from_millis(60));

        let mut visited = Vec::new();
        let mut total = 0;
        let purged = cache.keys(|key, value| {
            visited.push((key.to_string(), value.clone()));
            total += match key {
                "long" => 20,
                "forever" => 5,
                _ => 1000,
            };
        });
        visited.sort();

        assert_eq!(
            visited,
            vec![
                ("forever".to_string(), "f".to_string()),
                ("long".to_string(), "l".to_string())
            ]
        );
        assert_eq!(purged, 1);
        assert_eq!(cache.used(), total);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_compute_failure_is_not_cached() {
        let cache: Cache<String> = Cache::new(100);

        let result = cache.get("k", || Err(anyhow::anyhow!("backend unavailable")));
        match result {
            Err(CacheError::ComputeFailed { key, cause }) => {
                assert_eq!(key, "k");
                assert!(cause.to_string().contains("backend unavailable"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 1);
        assert_eq!(cache.get("k", value("ok", 1)).unwrap(), "ok");
    }

    #[test]
    fn test_single_flight_under_concurrency() {
        const CALLERS: usize = 8;
        let cache = Arc::new(Cache::new(100));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get("shared", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50));
                        Ok(Computed::new("rendered".to_string(), LONG_TTL, 8))
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "rendered");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.used(), 8);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_waiters_receive_leader_value() {
        let cache = Arc::new(Cache::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get("k", move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(Computed::new("from-leader".to_string(), LONG_TTL, 2))
                })
            })
        };
        started_rx.recv().unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("k", unreachable_compute))
            })
            .collect();
        wait_for_coalesced(&cache, 3);

        release_tx.send(()).unwrap();

        assert_eq!(leader.join().unwrap().unwrap(), "from-leader");
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap().unwrap(), "from-leader");
        }
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_failure_propagates_to_waiters() {
        let cache = Arc::new(Cache::<String>::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get("k", move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Err(anyhow::anyhow!("render failed"))
                })
            })
        };
        started_rx.recv().unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("k", unreachable_compute))
            })
            .collect();
        wait_for_coalesced(&cache, 3);

        release_tx.send(()).unwrap();

        assert!(matches!(
            leader.join().unwrap(),
            Err(CacheError::ComputeFailed { .. })
        ));
        for waiter in waiters {
            assert!(matches!(
                waiter.join().unwrap(),
                Err(CacheError::ComputeFailed { .. })
            ));
        }
        assert!(cache.is_empty());
        assert_eq!(cache.get("k", value("recovered", 1)).unwrap(), "recovered");
    }

    #[test]
    fn test_panic_releases_waiters() {
        let cache = Arc::new(Cache::<String>::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get("k", move || -> anyhow::Result<Computed<String>> {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("renderer crashed");
                })
            })
        };
        started_rx.recv().unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get("k", unreachable_compute))
        };
        wait_for_coalesced(&cache, 1);

        release_tx.send(()).unwrap();

        assert!(leader.join().is_err(), "leader should propagate the panic");
        assert!(matches!(
            waiter.join().unwrap(),
            Err(CacheError::ComputePanicked { .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_pending_entry_survives_sweep() {
        let cache = Arc::new(Cache::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        cache.get("a", value("A", 60)).unwrap();

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get("slow", move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(Computed::new("S".to_string(), LONG_TTL, 10))
                })
            })
        };
        started_rx.recv().unwrap();

        // Pushes used over budget while 'slow' is still in flight
        cache.get("b", value("B", 60)).unwrap();
        assert_eq!(cache.len(), 2, "pending 'slow' must stay indexed");
        assert_eq!(cache.used(), 60);

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap().unwrap(), "S");

        assert_eq!(
            resident_keys(&cache),
            HashSet::from(["b".to_string(), "slow".to_string()])
        );
        assert_eq!(cache.used(), 70);
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn test_delete_pending_entry_panics() {
        let cache = Arc::new(Cache::<String>::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let cache_clone = Arc::clone(&cache);
        thread::spawn(move || {
            let _ = cache_clone.get("k", move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
                Ok(Computed::new("v".to_string(), LONG_TTL, 1))
            });
        });
        started_rx.recv().unwrap();

        let _release = release_tx;
        cache.del("k");
    }

    #[test]
    fn test_try_delete_pending_entry_reports_in_flight() {
        let cache = Arc::new(Cache::<String>::new(100));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache.get("k", move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(Computed::new("v".to_string(), LONG_TTL, 1))
                })
            })
        };
        started_rx.recv().unwrap();

        assert!(matches!(
            cache.try_del("k"),
            Err(CacheError::InFlight { .. })
        ));
        assert!(!cache.try_del("other").unwrap());

        release_tx.send(()).unwrap();
        assert_eq!(leader.join().unwrap().unwrap(), "v");
        assert!(cache.try_del("k").unwrap());
    }

    #[test]
    fn test_stats_snapshot() {
        let cache = Cache::new(100);

        cache.get("k", value("v", 10)).unwrap(); // miss
        cache.get("k", unreachable_compute).unwrap(); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.used, 10);
        assert_eq!(stats.budget, 100);
    }

    #[tokio::test]
    async fn test_get_async_miss_then_hit() {
        let cache = Cache::new(100);

        let first = cache
            .get_async("k", || async { Ok(Computed::new("v".to_string(), LONG_TTL, 1)) })
            .await
            .unwrap();
        let second = cache
            .get_async("k", || async { unreachable_compute() })
            .await
            .unwrap();

        assert_eq!(first, "v");
        assert_eq!(second, "v");
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_get_async_waiters_share_one_computation() {
        let cache = Arc::new(Cache::new(100));
        let calls = Arc::new(AtomicUsize::new(0));

        // One thread drives every task, so joiners must not block it.
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_async("k", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Computed::new("shared".to_string(), LONG_TTL, 6))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().coalesced + cache.stats().hits, 15);
        assert_eq!(cache.used(), 6);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_get_async_failure_reaches_async_waiters() {
        let cache = Arc::new(Cache::<String>::new(100));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_async("k", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(anyhow::anyhow!("upstream down"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let waiter = cache
            .get_async("k", || async { unreachable_compute() })
            .await;

        assert!(matches!(waiter, Err(CacheError::ComputeFailed { .. })));
        assert!(matches!(
            leader.await.unwrap(),
            Err(CacheError::ComputeFailed { .. })
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cancelled_leader_releases_waiters() {
        let cache = Arc::new(Cache::<String>::new(100));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_async("k", || async {
                        std::future::pending::<anyhow::Result<Computed<String>>>().await
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_async("k", || async { unreachable_compute() })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(matches!(
            waiter.await.unwrap(),
            Err(CacheError::ComputeCancelled { .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().failures, 1);

        let value = cache
            .get_async("k", || async { Ok(Computed::new("again".to_string(), LONG_TTL, 5)) })
            .await
            .unwrap();
        assert_eq!(value, "again");
    }
}
