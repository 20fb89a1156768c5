// # Cache Engine
//
// A named, size-bounded, LRU-ordered, TTL-aware map from string keys to
// opaque byte values, with single-flight semantics: at most one computation
// per key may be in progress at a time, other callers wait on a condition
// variable until it completes.
//
// ## Architecture
//
// ```text
// ┌────────────────────────────────────────────────────────┐
// │                        Cache                           │
// │  ┌───────────────┐   ┌───────────────┐  ┌────────────┐ │
// │  │ key -> index   │   │  LRU list     │  │  stats     │ │
// │  │ (HashMap)      │ → │  (arena link) │  │  counters  │ │
// │  └───────────────┘   └───────────────┘  └────────────┘ │
// └────────────────────────────────────────────────────────┘
// ```
//
// Expiry is lazy: entries are only checked against the wall clock when
// touched by `find_entry`/`create_entry`/iteration, never by a background
// sweep. A single mutex guards the map, arena, and counters; a condition
// variable coordinates single-flight waiters.

mod entry;
mod stats;

pub use entry::CacheEntry;
pub use stats::CacheStats;

use entry::{EntryArena, Slot};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Called with the value of an entry that is being overwritten or evicted,
/// so callers can release any external resources the bytes represent.
pub type FreeProc = Arc<dyn Fn(Bytes) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
}

/// Per-cache configuration, fixed at creation time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    pub max_entry: usize,
    pub default_ttl: Option<Duration>,
    pub default_wait_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 64 * 1024 * 1024,
            max_entry: 4 * 1024 * 1024,
            default_ttl: None,
            default_wait_timeout: Some(Duration::from_secs(30)),
        }
    }
}

struct State {
    map: HashMap<String, usize>,
    arena: EntryArena,
    current_size: usize,
    stats: CacheStats,
}

/// A named, thread-safe, size-bounded, LRU-evicting, TTL-expiring,
/// single-flight-capable associative store.
pub struct Cache {
    name: String,
    config: CacheConfig,
    free_proc: Option<FreeProc>,
    state: Mutex<State>,
    cond: Condvar,
}

impl Cache {
    pub fn new(name: impl Into<String>, config: CacheConfig, free_proc: Option<FreeProc>) -> Self {
        Self {
            name: name.into(),
            config,
            free_proc,
            state: Mutex::new(State {
                map: HashMap::new(),
                arena: EntryArena::new(),
                current_size: 0,
                stats: CacheStats::new(),
            }),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_size(&self) -> usize {
        self.state.lock().current_size
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    /// Look up `key`. Misses (absent, in-flight, or expired) count as a miss;
    /// a hit moves the entry to the MRU end and bumps its reuse counter.
    pub fn find_entry(&self, key: &str) -> Option<Bytes> {
        let mut st = self.state.lock();
        let idx = *st.map.get(key)?;
        let now = Instant::now();

        if st.arena.get(idx).is_expired(now) {
            self.expire_locked(&mut st, idx);
            st.stats.record_miss();
            return None;
        }
        if st.arena.get(idx).is_in_flight() {
            st.stats.record_miss();
            return None;
        }

        st.arena.touch(idx);
        let e = st.arena.get_mut(idx);
        e.reuse_count += 1;
        st.stats.record_hit();
        e.value.clone()
    }

    /// Create (or reclaim) the in-flight placeholder for `key`, returning a
    /// guard that still holds the cache lock. If the entry existed and is
    /// valid (non-expired, value present) `is_new` is false and the caller
    /// should read the value straight off the guard. If it existed but was
    /// expired, its value is unset and `is_new` is reported true. If absent,
    /// a fresh in-flight entry is created and `is_new` is true.
    pub fn create_entry(&self, key: &str) -> CacheEntryGuard<'_> {
        let mut st = self.state.lock();
        let (idx, is_new) = self.create_entry_locked(&mut st, key);
        CacheEntryGuard {
            cache: self,
            state: Some(st),
            index: idx,
            is_new,
        }
    }

    fn create_entry_locked(&self, st: &mut State, key: &str) -> (usize, bool) {
        let now = Instant::now();
        if let Some(&idx) = st.map.get(key) {
            if st.arena.get(idx).is_expired(now) {
                st.arena.get_mut(idx).value = None;
                st.arena.get_mut(idx).expires_at = None;
                st.stats.record_expired();
                st.arena.touch(idx);
                return (idx, true);
            }
            st.arena.touch(idx);
            if !st.arena.get(idx).is_in_flight() {
                st.arena.get_mut(idx).reuse_count += 1;
            }
            return (idx, false);
        }
        let entry = entry::CacheEntry::new(key.to_string());
        let idx = st.arena.insert(entry);
        st.arena.link_front(idx);
        st.map.insert(key.to_string(), idx);
        (idx, true)
    }

    /// As `create_entry`, but if the entry is present, not-new, and still
    /// in-flight (another worker is computing it), block on the condition
    /// variable until signaled or `deadline` passes, then retry.
    pub fn wait_create_entry(
        &self,
        key: &str,
        deadline: Option<Instant>,
    ) -> Result<CacheEntryGuard<'_>, WaitError> {
        let mut st = self.state.lock();
        loop {
            let (idx, is_new) = self.create_entry_locked(&mut st, key);
            if is_new || !st.arena.get(idx).is_in_flight() {
                return Ok(CacheEntryGuard {
                    cache: self,
                    state: Some(st),
                    index: idx,
                    is_new,
                });
            }
            match deadline {
                None => self.cond.wait(&mut st),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(WaitError::Timeout);
                    }
                    self.cond.wait_for(&mut st, d - now);
                }
            }
        }
    }

    /// Convenience wrapper implementing the canonical single-flight pattern:
    /// on a hit, return the cached value; on a miss, compute it exactly
    /// once (other callers wait), store it, and return it to everyone.
    pub fn get_or_compute<F>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Bytes, WaitError>
    where
        F: FnOnce() -> (Bytes, Duration),
    {
        let deadline = self
            .config
            .default_wait_timeout
            .map(|t| Instant::now() + t);
        loop {
            let guard = self.wait_create_entry(key, deadline)?;
            if !guard.is_new {
                if let Some(v) = guard.value() {
                    return Ok(v.clone());
                }
                // Woke up but the populating worker failed without setting a
                // value (panicked mid-compute); fall through and retry as if
                // new.
                continue;
            }
            let key_owned = guard.key().to_string();
            drop(guard); // release the lock while we compute
            let (value, cost) = compute();
            self.set_value(&key_owned, value.clone(), ttl, cost);
            return Ok(value);
        }
    }

    /// Install a value on an existing (possibly in-flight) entry, by key.
    /// No-op if the entry has since been deleted out from under the caller.
    pub fn set_value(&self, key: &str, value: Bytes, ttl: Option<Duration>, cost: Duration) {
        let mut st = self.state.lock();
        let Some(&idx) = st.map.get(key) else {
            return;
        };
        self.set_value_locked(&mut st, idx, value, ttl, cost);
        self.cond.notify_all();
    }

    fn set_value_locked(
        &self,
        st: &mut State,
        idx: usize,
        value: Bytes,
        ttl: Option<Duration>,
        cost: Duration,
    ) {
        let size = value.len();

        if size > self.config.max_entry {
            // Per-entry cap: delete rather than store.
            self.remove_locked(st, idx);
            return;
        }

        let old = std::mem::replace(&mut st.arena.get_mut(idx).value, Some(value));
        if let Some(old_bytes) = old {
            st.current_size = st.current_size.saturating_sub(old_bytes.len());
            if let Some(free) = &self.free_proc {
                free(old_bytes);
            }
        }
        st.current_size += size;
        st.arena.get_mut(idx).cost = cost;
        let expires_at = ttl.or(self.config.default_ttl).map(|d| Instant::now() + d);
        st.arena.get_mut(idx).expires_at = expires_at;
        st.arena.touch(idx);

        // Evict from the LRU tail while over budget, skipping the entry we
        // just wrote and any still-in-flight entries (concurrent
        // populations). If the tail is exactly the entry we just wrote,
        // stop — a single oversized entry is tolerated rather than deleted.
        while st.current_size > self.config.max_size {
            let Some(tail) = st.arena.tail else { break };
            if tail == idx {
                break;
            }
            if st.arena.get(tail).is_in_flight() {
                // Can't evict a concurrent population; walk inward instead
                // of spinning forever on a cache full of in-flight entries.
                let mut candidate = st.arena.get(tail).prev;
                let mut evicted = false;
                while let Some(c) = candidate {
                    if c == idx {
                        break;
                    }
                    if !st.arena.get(c).is_in_flight() {
                        self.prune_locked(st, c);
                        evicted = true;
                        break;
                    }
                    candidate = st.arena.get(c).prev;
                }
                if !evicted {
                    break;
                }
                continue;
            }
            self.prune_locked(st, tail);
        }
    }

    fn prune_locked(&self, st: &mut State, idx: usize) {
        self.remove_locked(st, idx);
        st.stats.record_pruned();
    }

    fn expire_locked(&self, st: &mut State, idx: usize) {
        self.remove_locked(st, idx);
        st.stats.record_expired();
    }

    fn remove_locked(&self, st: &mut State, idx: usize) {
        let entry = st.arena.remove(idx);
        st.map.remove(&entry.key);
        if let Some(value) = entry.value {
            st.current_size = st.current_size.saturating_sub(value.len());
            if let Some(free) = &self.free_proc {
                free(value);
            }
        }
    }

    pub fn unset_value(&self, key: &str) {
        let mut st = self.state.lock();
        if let Some(&idx) = st.map.get(key) {
            if let Some(value) = st.arena.get_mut(idx).value.take() {
                st.current_size = st.current_size.saturating_sub(value.len());
                if let Some(free) = &self.free_proc {
                    free(value);
                }
            }
        }
    }

    pub fn delete_entry(&self, key: &str) -> bool {
        let mut st = self.state.lock();
        if let Some(&idx) = st.map.get(key) {
            self.remove_locked(&mut st, idx);
            true
        } else {
            false
        }
    }

    pub fn flush_entry(&self, key: &str) -> bool {
        let mut st = self.state.lock();
        if let Some(&idx) = st.map.get(key) {
            self.remove_locked(&mut st, idx);
            st.stats.record_flushed();
            true
        } else {
            false
        }
    }

    pub fn flush_all(&self) {
        let mut st = self.state.lock();
        let keys: Vec<String> = st.map.keys().cloned().collect();
        for key in keys {
            if let Some(&idx) = st.map.get(&key) {
                self.remove_locked(&mut st, idx);
                st.stats.record_flushed();
            }
        }
    }

    pub fn flush_by_exact_keys(&self, keys: &[String]) {
        let mut st = self.state.lock();
        for key in keys {
            if let Some(&idx) = st.map.get(key) {
                self.remove_locked(&mut st, idx);
                st.stats.record_flushed();
            }
        }
    }

    /// Flush every key matching a `*`/`?` glob pattern.
    pub fn flush_by_pattern(&self, pattern: &str) {
        let mut st = self.state.lock();
        let keys: Vec<String> = st
            .map
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in keys {
            if let Some(&idx) = st.map.get(&key) {
                self.remove_locked(&mut st, idx);
                st.stats.record_flushed();
            }
        }
    }

    /// Snapshot current counters, including aggregate cost saved by reuse
    /// (sum of reuse_count * cost across all currently resident entries).
    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        let mut stats = st.stats.clone();
        let mut saved = Duration::ZERO;
        for slot in &st.arena.slots {
            if let Slot::Occupied(e) = slot {
                saved += e.cost.saturating_mul(e.reuse_count as u32);
            }
        }
        stats.saved_cost = saved;
        stats
    }

    /// Snapshot resident keys from MRU to LRU, lazily evicting anything
    /// expired along the way. In-flight entries are skipped.
    pub fn keys_snapshot(&self) -> Vec<String> {
        let mut st = self.state.lock();
        let now = Instant::now();
        let mut out = Vec::new();
        let mut cur = st.arena.head;
        let mut expired = Vec::new();
        while let Some(idx) = cur {
            let e = st.arena.get(idx);
            cur = e.next;
            if e.is_expired(now) {
                expired.push(idx);
                continue;
            }
            if e.is_in_flight() {
                continue;
            }
            out.push(e.key.clone());
        }
        for idx in expired {
            self.expire_locked(&mut st, idx);
        }
        out
    }

    /// Block the calling thread on this cache's condition variable until
    /// signaled or `deadline` passes.
    pub fn timed_wait(&self, deadline: Instant) {
        let mut st = self.state.lock();
        let now = Instant::now();
        if now < deadline {
            self.cond.wait_for(&mut st, deadline - now);
        }
    }

    pub fn signal(&self) {
        self.cond.notify_one();
    }

    pub fn broadcast(&self) {
        self.cond.notify_all();
    }
}

/// A locked handle returned by `create_entry`/`wait_create_entry`. Holding
/// this keeps the cache's mutex locked; drop it (or call `set_value`) to
/// release it.
pub struct CacheEntryGuard<'a> {
    cache: &'a Cache,
    state: Option<MutexGuard<'a, State>>,
    index: usize,
    pub is_new: bool,
}

impl<'a> CacheEntryGuard<'a> {
    pub fn key(&self) -> &str {
        &self.state.as_ref().unwrap().arena.get(self.index).key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.state.as_ref().unwrap().arena.get(self.index).value.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.value().is_none()
    }

    /// Install the computed value, evict as needed, and broadcast to any
    /// single-flight waiters. Consumes the guard, releasing the lock.
    pub fn set_value(mut self, value: Bytes, ttl: Option<Duration>, cost: Duration) {
        let mut st = self.state.take().unwrap();
        self.cache.set_value_locked(&mut st, self.index, value, ttl, cost);
        self.cache.cond.notify_all();
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                if inner(&p[1..], t) {
                    return true;
                }
                !t.is_empty() && inner(p, &t[1..])
            }
            Some(b'?') => !t.is_empty() && inner(&p[1..], &t[1..]),
            Some(&c) => !t.is_empty() && t[0] == c && inner(&p[1..], &t[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, max_entry: usize) -> Cache {
        Cache::new(
            "t",
            CacheConfig {
                max_size,
                max_entry,
                default_ttl: None,
                default_wait_timeout: Some(Duration::from_secs(5)),
            },
            None,
        )
    }

    #[test]
    fn set_then_get_within_ttl() {
        let c = cache(1024, 1024);
        let g = c.create_entry("k");
        assert!(g.is_new);
        g.set_value(Bytes::from_static(b"v"), None, Duration::ZERO);
        assert_eq!(c.find_entry("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn expired_entry_is_a_miss_and_counts_expired() {
        let c = cache(1024, 1024);
        let g = c.create_entry("k");
        g.set_value(
            Bytes::from_static(b"v"),
            Some(Duration::from_millis(1)),
            Duration::ZERO,
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.find_entry("k"), None);
        assert_eq!(c.stats().expired, 1);
    }

    #[test]
    fn lru_eviction_under_pressure() {
        let c = cache(100, 100);
        for i in 0..20 {
            let key = format!("k{i}");
            let g = c.create_entry(&key);
            g.set_value(Bytes::from(vec![0u8; 10]), None, Duration::ZERO);
        }
        assert_eq!(c.len(), 10);
        assert_eq!(c.stats().pruned, 10);
        for i in 0..10 {
            assert_eq!(c.find_entry(&format!("k{i}")), None);
        }
        for i in 10..20 {
            assert!(c.find_entry(&format!("k{i}")).is_some());
        }
    }

    #[test]
    fn oversized_single_entry_is_tolerated() {
        let c = cache(10, 1024);
        let g = c.create_entry("only");
        g.set_value(Bytes::from(vec![0u8; 50]), None, Duration::ZERO);
        assert_eq!(c.len(), 1);
        assert_eq!(c.current_size(), 50);
    }

    #[test]
    fn per_entry_cap_silently_discards() {
        let c = cache(1024, 10);
        let g = c.create_entry("k");
        g.set_value(Bytes::from(vec![0u8; 50]), None, Duration::ZERO);
        assert_eq!(c.len(), 0);
        assert_eq!(c.find_entry("k"), None);
    }

    #[test]
    fn single_flight_blocks_second_caller_until_signal() {
        let c = Arc::new(cache(1024, 1024));
        let c2 = c.clone();
        let g = c.create_entry("k");
        assert!(g.is_new);

        let waiter = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            let got = c2.wait_create_entry("k", Some(deadline)).unwrap();
            assert!(!got.is_new);
            got.value().cloned()
        });

        std::thread::sleep(Duration::from_millis(50));
        g.set_value(Bytes::from_static(b"computed"), None, Duration::ZERO);

        let value = waiter.join().unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"computed")));
    }

    #[test]
    fn wait_create_entry_times_out() {
        let c = cache(1024, 1024);
        let _holder = c.create_entry("k"); // left in-flight, never set
        let deadline = Instant::now() + Duration::from_millis(30);
        assert_eq!(c.wait_create_entry("k", Some(deadline)).unwrap_err(), WaitError::Timeout);
    }

    #[test]
    fn get_or_compute_runs_once_for_concurrent_callers() {
        let c = Arc::new(cache(1024, 1024));
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(std::thread::spawn(move || {
                c.get_or_compute("k", None, || {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    (Bytes::from_static(b"expensive"), Duration::from_millis(5))
                })
                .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), Bytes::from_static(b"expensive"));
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
    }

    #[test]
    fn flush_by_pattern_matches_glob() {
        let c = cache(1024, 1024);
        for k in ["user:1", "user:2", "order:1"] {
            let g = c.create_entry(k);
            g.set_value(Bytes::from_static(b"v"), None, Duration::ZERO);
        }
        c.flush_by_pattern("user:*");
        assert_eq!(c.len(), 1);
        assert!(c.find_entry("order:1").is_some());
    }
}
