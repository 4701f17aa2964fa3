//! Process-wide memo cache
//!
//! Stores the results of expensive calls keyed by [`Fingerprint`]. The cache
//! is shared by every session and is handed around as `Arc<MemoCache>`.
//!
//! Guarantees:
//! - A miss runs the computation at most once per fingerprint, even when many
//!   callers ask for it concurrently; the others block until it finishes and
//!   receive the same outcome.
//! - A failed (or panicking) computation is reported to every waiter and is
//!   never stored, so the next call retries.
//! - When a function's logic hash changes, all entries of that function are
//!   purged before the lookup proceeds.
//!
//! # Example
//!
//! ```
//! use encore::{Args, CachePolicy, Fingerprint, FunctionIdentity, MemoCache};
//!
//! let cache = MemoCache::unbounded();
//! let identity = FunctionIdentity::versioned("double", "1");
//! let fp = Fingerprint::compute(&identity, &Args::new().arg(&21).unwrap()).unwrap();
//!
//! let value = cache
//!     .get_or_compute(&fp, CachePolicy::CopyOnRead, || Ok(21 * 2))
//!     .unwrap();
//! assert_eq!(*value, 42);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EncoreError, Result};
use crate::eviction::{EvictionCandidate, EvictionConfig, EvictionManager};
use crate::fingerprint::Fingerprint;
use crate::logging::{operations, services, status};

type AnyValue = Arc<dyn Any + Send + Sync>;

/// How a cached value is handed back to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Every retrieval yields an independent clone of the stored value
    CopyOnRead,
    /// Every retrieval yields the same shared instance
    ShareOnRead,
}

impl CachePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CopyOnRead => "copy-on-read",
            Self::ShareOnRead => "share-on-read",
        }
    }
}

/// A value returned by [`MemoCache::get_or_compute`]
#[derive(Debug)]
pub enum Cached<T> {
    /// Independent copy (`CopyOnRead`)
    Copied(T),
    /// Shared instance (`ShareOnRead`)
    Shared(Arc<T>),
}

impl<T> Cached<T> {
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl<T: Clone> Cached<T> {
    /// Take an owned value, cloning out of the shared instance if needed
    pub fn into_owned(self) -> T {
        match self {
            Self::Copied(value) => value,
            Self::Shared(shared) => (*shared).clone(),
        }
    }
}

impl<T> Deref for Cached<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Copied(value) => value,
            Self::Shared(shared) => shared,
        }
    }
}

/// Cache counters
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

struct Entry {
    value: AnyValue,
    policy: CachePolicy,
    function: String,
    inserted: Instant,
    created_at: u64,
    accessed_at: u64,
    access_count: u64,
}

/// A computation in progress; waiters park on `done` until `outcome` is set
struct InFlight {
    function: String,
    outcome: Mutex<Option<Result<AnyValue>>>,
    done: Condvar,
}

impl InFlight {
    fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Result<AnyValue>) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<AnyValue> {
        let mut guard = lock(&self.outcome);
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum Slot {
    Ready(Entry),
    InFlight(Arc<InFlight>),
}

impl Slot {
    fn function(&self) -> &str {
        match self {
            Slot::Ready(entry) => &entry.function,
            Slot::InFlight(flight) => &flight.function,
        }
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    /// Last logic hash seen per function name
    logic: HashMap<String, String>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn ready_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Drop stored values of `function`; in-flight slots stay so their
    /// waiters keep a single leader
    fn remove_function(&mut self, function: &str) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| matches!(slot, Slot::InFlight(_)) || slot.function() != function);
        before - self.slots.len()
    }

    fn remove_ready(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| matches!(slot, Slot::InFlight(_)));
        before - self.slots.len()
    }
}

enum Role {
    Hit(AnyValue),
    Leader(Arc<InFlight>),
    Waiter(Arc<InFlight>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memo cache shared across sessions
pub struct MemoCache {
    state: Mutex<CacheState>,
    eviction: EvictionManager,
    counters: CacheCounters,
}

impl MemoCache {
    pub fn new(config: EvictionConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            eviction: EvictionManager::new(config),
            counters: CacheCounters::default(),
        }
    }

    /// Cache with no entry bound and no TTL
    pub fn unbounded() -> Self {
        Self::new(EvictionConfig::default())
    }

    pub fn config(&self) -> &EvictionConfig {
        self.eviction.config()
    }

    /// Look up `fingerprint`, computing and storing the value on a miss
    ///
    /// `policy` decides whether the caller gets a private clone or the shared
    /// instance. The stored value is never handed out mutably under
    /// `CopyOnRead`, including to the caller that computed it.
    pub fn get_or_compute<T, F>(
        &self,
        fingerprint: &Fingerprint,
        policy: CachePolicy,
        compute: F,
    ) -> Result<Cached<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let shared = self.fetch(fingerprint, policy, compute)?;
        Ok(match policy {
            CachePolicy::CopyOnRead => Cached::Copied((*shared).clone()),
            CachePolicy::ShareOnRead => Cached::Shared(shared),
        })
    }

    /// `CopyOnRead` lookup returning the owned value
    pub fn get_or_compute_data<T, F>(&self, fingerprint: &Fingerprint, compute: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let shared = self.fetch(fingerprint, CachePolicy::CopyOnRead, compute)?;
        Ok((*shared).clone())
    }

    /// `ShareOnRead` lookup for values that can't (or shouldn't) be cloned
    pub fn get_or_compute_shared<T, F>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.fetch(fingerprint, CachePolicy::ShareOnRead, compute)
    }

    fn fetch<T, F>(&self, fingerprint: &Fingerprint, policy: CachePolicy, compute: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let role = self.claim(fingerprint);

        let value = match role {
            Role::Hit(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = services::MEMO,
                    operation = operations::GET,
                    status = status::HIT,
                    fingerprint = %fingerprint,
                    "cache hit"
                );
                value
            }
            Role::Waiter(flight) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = services::MEMO,
                    operation = operations::GET,
                    status = status::JOIN,
                    fingerprint = %fingerprint,
                    "joining in-flight computation"
                );
                flight.wait()?
            }
            Role::Leader(flight) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = services::MEMO,
                    operation = operations::GET,
                    status = status::MISS,
                    fingerprint = %fingerprint,
                    "cache miss"
                );
                self.lead(fingerprint, policy, flight, compute)?
            }
        };

        value
            .downcast::<T>()
            .map_err(|_| EncoreError::TypeMismatch {
                fingerprint: fingerprint.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Decide under the lock whether this caller hits, waits or computes
    fn claim(&self, fingerprint: &Fingerprint) -> Role {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        self.check_logic(state, fingerprint);

        let key = fingerprint.as_str();

        let expired = match state.slots.get(key) {
            Some(Slot::Ready(entry)) => self.eviction.is_expired(entry.inserted.elapsed()),
            _ => false,
        };
        if expired {
            state.slots.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                service = services::MEMO,
                operation = operations::GET,
                status = status::EXPIRED,
                fingerprint = %fingerprint,
                "cache entry expired"
            );
        }

        let tick = state.next_tick();
        match state.slots.get_mut(key) {
            Some(Slot::Ready(entry)) => {
                entry.accessed_at = tick;
                entry.access_count += 1;
                Role::Hit(Arc::clone(&entry.value))
            }
            Some(Slot::InFlight(flight)) => Role::Waiter(Arc::clone(flight)),
            None => {
                let flight = Arc::new(InFlight::new(fingerprint.function()));
                state
                    .slots
                    .insert(key.to_string(), Slot::InFlight(Arc::clone(&flight)));
                Role::Leader(flight)
            }
        }
    }

    /// Purge a function's entries when its logic hash changed since last seen
    fn check_logic(&self, state: &mut CacheState, fingerprint: &Fingerprint) {
        let function = fingerprint.function();
        let logic_hash = fingerprint.logic_hash();

        match state.logic.get(function) {
            Some(known) if known == logic_hash => {}
            Some(_) => {
                let purged = state.remove_function(function);
                state
                    .logic
                    .insert(function.to_string(), logic_hash.to_string());
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                info!(
                    service = services::MEMO,
                    operation = operations::INVALIDATE,
                    function,
                    entry_count = purged,
                    "function logic changed, purged its cache entries"
                );
            }
            None => {
                state
                    .logic
                    .insert(function.to_string(), logic_hash.to_string());
            }
        }
    }

    /// Run the computation as the single leader for this fingerprint
    fn lead<T, F>(
        &self,
        fingerprint: &Fingerprint,
        policy: CachePolicy,
        flight: Arc<InFlight>,
        compute: F,
    ) -> Result<AnyValue>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let outcome: Result<AnyValue> = match panic::catch_unwind(AssertUnwindSafe(compute)) {
            Ok(Ok(value)) => Ok(Arc::new(value) as AnyValue),
            Ok(Err(e)) => Err(EncoreError::ComputeFailure {
                fingerprint: fingerprint.to_string(),
                message: format!("{:#}", e),
            }),
            Err(payload) => Err(EncoreError::ComputeFailure {
                fingerprint: fingerprint.to_string(),
                message: format!("computation panicked: {}", panic_message(&*payload)),
            }),
        };

        {
            let mut state = lock(&self.state);
            let key = fingerprint.as_str();

            let still_ours = matches!(
                state.slots.get(key),
                Some(Slot::InFlight(current)) if Arc::ptr_eq(current, &flight)
            );
            // Logic may have changed while we computed; the result is then stale.
            let logic_current = state.logic.get(fingerprint.function()).map(String::as_str)
                == Some(fingerprint.logic_hash());

            match &outcome {
                Ok(value) if still_ours && logic_current => {
                    let tick = state.next_tick();
                    state.slots.insert(
                        key.to_string(),
                        Slot::Ready(Entry {
                            value: Arc::clone(value),
                            policy,
                            function: fingerprint.function().to_string(),
                            inserted: Instant::now(),
                            created_at: tick,
                            accessed_at: tick,
                            access_count: 1,
                        }),
                    );
                    self.enforce_bound(&mut state, key);
                }
                Ok(_) => {
                    if still_ours {
                        state.slots.remove(key);
                    }
                }
                Err(_) => {
                    if still_ours {
                        state.slots.remove(key);
                    }
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        match &outcome {
            Ok(_) => debug!(
                service = services::MEMO,
                operation = operations::PUT,
                status = status::SUCCESS,
                policy = policy.as_str(),
                fingerprint = %fingerprint,
                duration_ms = started.elapsed().as_millis() as u64,
                "stored computed value"
            ),
            Err(e) => warn!(
                service = services::MEMO,
                operation = operations::PUT,
                status = status::ERROR,
                fingerprint = %fingerprint,
                error = %e,
                "computation failed, nothing stored"
            ),
        }

        flight.publish(outcome.clone());
        outcome
    }

    /// Evict entries over `max_entries`, never the one just inserted
    fn enforce_bound(&self, state: &mut CacheState, just_inserted: &str) {
        let count = state.ready_count();
        if !self.eviction.needs_eviction(count) {
            return;
        }

        let candidates: Vec<EvictionCandidate> = state
            .slots
            .iter()
            .filter(|(key, _)| key.as_str() != just_inserted)
            .filter_map(|(key, slot)| match slot {
                Slot::Ready(entry) => Some(EvictionCandidate {
                    id: key.clone(),
                    accessed_at: entry.accessed_at,
                    access_count: entry.access_count,
                    created_at: entry.created_at,
                }),
                Slot::InFlight(_) => None,
            })
            .collect();

        let selected = self.eviction.select_candidates(&candidates, count);
        for candidate in &selected {
            state.slots.remove(&candidate.id);
        }
        self.counters
            .evictions
            .fetch_add(selected.len() as u64, Ordering::Relaxed);
        self.eviction
            .log_summary(selected.len(), operations::EVICT, "max_entries");
    }

    /// Remove entries older than the TTL; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        if self.eviction.config().ttl.is_none() {
            return 0;
        }

        let mut state = lock(&self.state);
        let before = state.slots.len();
        state.slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !self.eviction.is_expired(entry.inserted.elapsed()),
            Slot::InFlight(_) => true,
        });
        let purged = before - state.slots.len();

        self.counters
            .evictions
            .fetch_add(purged as u64, Ordering::Relaxed);
        self.eviction.log_summary(purged, operations::EXPIRE, "ttl");
        purged
    }

    /// Whether a value is stored for `fingerprint` (in-flight doesn't count)
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        matches!(
            lock(&self.state).slots.get(fingerprint.as_str()),
            Some(Slot::Ready(_))
        )
    }

    /// Policy the entry for `fingerprint` was stored with
    pub fn stored_policy(&self, fingerprint: &Fingerprint) -> Option<CachePolicy> {
        match lock(&self.state).slots.get(fingerprint.as_str()) {
            Some(Slot::Ready(entry)) => Some(entry.policy),
            _ => None,
        }
    }

    /// Drop every stored entry
    ///
    /// Computations already running keep their slot and publish to their
    /// waiters as usual.
    pub fn clear(&self) {
        let removed = lock(&self.state).remove_ready();
        info!(
            service = services::MEMO,
            operation = operations::CLEAR,
            entry_count = removed,
            "cleared memo cache"
        );
    }

    /// Drop the entries of one function; returns how many were removed
    pub fn clear_function(&self, function: &str) -> usize {
        let removed = lock(&self.state).remove_function(function);
        info!(
            service = services::MEMO,
            operation = operations::CLEAR,
            function,
            entry_count = removed,
            "cleared function cache entries"
        );
        removed
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        lock(&self.state).ready_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
