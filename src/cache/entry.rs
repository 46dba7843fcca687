//! Cache Entry Module
//!
//! Defines the per-key record held in the slot arena, its expiry state,
//! and the triple a compute closure hands back to the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::flight::Flight;

// == Expiry ==
/// Expiration state of an entry.
///
/// `Pending` is a distinct state rather than a sentinel timestamp, so no real
/// deadline can ever be mistaken for an in-flight computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Computation still in flight, no value yet
    Pending,
    /// Stale once `now >= deadline`
    At(Instant),
    /// Never goes stale
    Never,
}

impl Expiry {
    // == From TTL ==
    /// Converts a TTL measured from `now` into an expiry.
    ///
    /// `None` never expires. A deadline that does not fit in an `Instant`
    /// is treated the same way.
    pub fn from_ttl(now: Instant, ttl: Option<Duration>) -> Self {
        match ttl.and_then(|ttl| now.checked_add(ttl)) {
            Some(deadline) => Expiry::At(deadline),
            None => Expiry::Never,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Expiry::Pending)
    }

    // == Has Passed ==
    /// Returns true if the deadline is at or before `now`.
    ///
    /// Pending and never-expiring entries are never stale.
    pub fn has_passed(&self, now: Instant) -> bool {
        match self {
            Expiry::At(deadline) => now >= *deadline,
            Expiry::Pending | Expiry::Never => false,
        }
    }
}

// == Computed ==
/// Result of a successful compute closure: the value plus the metadata the
/// cache needs to store it.
#[derive(Debug, Clone)]
pub struct Computed<V> {
    /// The value to cache and return
    pub value: V,
    /// Time to live, `None` = never expires
    pub ttl: Option<Duration>,
    /// Caller-declared cost counted against the budget
    pub size: usize,
}

impl<V> Computed<V> {
    /// Creates a result that expires after `ttl`.
    pub fn new(value: V, ttl: Duration, size: usize) -> Self {
        Self {
            value,
            ttl: Some(ttl),
            size,
        }
    }

    /// Creates a result that never expires.
    pub fn forever(value: V, size: usize) -> Self {
        Self {
            value,
            ttl: None,
            size,
        }
    }
}

// == Entry ==
/// A single slot in the recency arena.
///
/// While pending, `value` is `None`, `size` is 0, `flight` carries the
/// completion signal and the entry is not linked into the list.
#[derive(Debug)]
pub(crate) struct Entry<V> {
    pub key: String,
    pub value: Option<V>,
    pub expiry: Expiry,
    pub size: usize,
    /// Callers currently blocked on this entry's computation
    pub waiting: usize,
    pub flight: Option<Arc<Flight<V>>>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub linked: bool,
}

impl<V> Entry<V> {
    // == Pending Constructor ==
    /// Creates a placeholder for a computation that is about to start.
    ///
    /// The computing caller counts as the first waiter.
    pub fn pending(key: String, flight: Arc<Flight<V>>) -> Self {
        Self {
            key,
            value: None,
            expiry: Expiry::Pending,
            size: 0,
            waiting: 1,
            flight: Some(flight),
            prev: None,
            next: None,
            linked: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.expiry.is_pending()
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.expiry.has_passed(now)
    }
}
