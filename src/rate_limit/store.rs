//! Concurrent storage for per-key token buckets.
//!
//! Buckets live in a sharded map. A [`BucketHandle`] holds its shard's write
//! lock, which gives the read-refill-withdraw sequence exclusive access to the
//! key. Eviction sweeps take the same shard locks, so a bucket is never removed
//! while a check on it is in flight. Keys in different shards never contend.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::rate_limit::bucket::{BucketLimits, TokenBucket};
use crate::rate_limit::key::ClientKey;
use crate::rate_limit::Decision;

/// Exclusive access to one key's bucket.
///
/// Do not hold a handle across an `.await` or while touching the same store
/// again: it pins a shard lock.
pub struct BucketHandle<'a> {
    inner: RefMut<'a, ClientKey, TokenBucket>,
    created: bool,
}

impl BucketHandle<'_> {
    /// Whether this call created the bucket (first request for the key).
    pub fn is_new(&self) -> bool {
        self.created
    }

    /// The key this bucket belongs to.
    pub fn key(&self) -> &ClientKey {
        self.inner.key()
    }
}

impl Deref for BucketHandle<'_> {
    type Target = TokenBucket;

    fn deref(&self) -> &TokenBucket {
        self.inner.value()
    }
}

impl DerefMut for BucketHandle<'_> {
    fn deref_mut(&mut self) -> &mut TokenBucket {
        self.inner.value_mut()
    }
}

impl std::fmt::Debug for BucketHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHandle")
            .field("key", self.key())
            .field("bucket", &**self)
            .field("created", &self.created)
            .finish()
    }
}

/// Owned, in-memory store of token buckets.
///
/// Construct one at startup and share it as `Arc<BucketStore>`; dropping the
/// last reference releases every bucket.
#[derive(Debug)]
pub struct BucketStore {
    buckets: DashMap<ClientKey, TokenBucket>,
    limits: BucketLimits,
    clock: Arc<dyn Clock>,
}

impl BucketStore {
    /// Create an empty store on the monotonic clock.
    pub fn new(limits: BucketLimits) -> Self {
        Self { buckets: DashMap::new(), limits, clock: Arc::new(MonotonicClock::default()) }
    }

    /// Override the clock (useful for deterministic tests).
    ///
    /// # Example
    /// ```
    /// use tollgate::{BucketLimits, BucketStore, ManualClock};
    /// let clock = ManualClock::new();
    /// let store = BucketStore::new(BucketLimits::new(5.0, 2.0).unwrap()).with_clock(clock.clone());
    /// assert!(store.check(&"k1".into()).is_admitted());
    /// ```
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Limits every bucket in this store is created with.
    pub fn limits(&self) -> BucketLimits {
        self.limits
    }

    /// Current reading of the store's clock, in nanoseconds.
    pub fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Exclusive handle to `key`'s bucket, creating a full one on first sight.
    ///
    /// Concurrent first requests for the same key collapse to one bucket:
    /// exactly one caller creates it and the others observe it.
    pub fn get_or_create(&self, key: &ClientKey) -> BucketHandle<'_> {
        if let Some(inner) = self.buckets.get_mut(key) {
            return BucketHandle { inner, created: false };
        }
        match self.buckets.entry(key.clone()) {
            Entry::Occupied(entry) => BucketHandle { inner: entry.into_ref(), created: false },
            Entry::Vacant(entry) => {
                let bucket = TokenBucket::full(self.limits, self.clock.now_nanos());
                trace!(target: "tollgate::store", key = %key, "bucket created");
                BucketHandle { inner: entry.insert(bucket), created: true }
            }
        }
    }

    /// Run one admission check for `key`.
    ///
    /// Refill and withdrawal happen under the key's exclusive handle, so
    /// concurrent checks for one key never over-admit.
    pub fn check(&self, key: &ClientKey) -> Decision {
        let mut bucket = self.get_or_create(key);
        self.admit(&mut bucket)
    }

    /// Admit against a handle obtained from [`BucketStore::get_or_create`].
    ///
    /// The clock is read while the handle is held so that checks on one key
    /// see non-decreasing timestamps.
    pub fn admit(&self, bucket: &mut BucketHandle<'_>) -> Decision {
        let now = self.clock.now_nanos();
        if now < bucket.last_refill_nanos() {
            trace!(
                target: "tollgate::store",
                key = %bucket.key(),
                behind_nanos = bucket.last_refill_nanos() - now,
                "clock moved backwards; refill clamped"
            );
        }
        let decision = bucket.admit(now);
        trace!(
            target: "tollgate::store",
            key = %bucket.key(),
            tokens = bucket.tokens(),
            last_refill = bucket.last_refill_nanos(),
            admitted = decision.is_admitted(),
            "bucket state"
        );
        decision
    }

    /// Remove every bucket idle for strictly longer than `threshold` as of `now`.
    ///
    /// Returns how many buckets were removed.
    pub fn evict_idle_older_than(&self, threshold: Duration, now: u64) -> usize {
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let keep = bucket.idle_for(now) <= threshold;
            if !keep {
                evicted += 1;
            }
            keep
        });
        debug!(
            target: "tollgate::store",
            evicted,
            remaining = self.buckets.len(),
            "idle bucket sweep complete"
        );
        evicted
    }

    /// [`BucketStore::evict_idle_older_than`] at the store clock's current time.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        self.evict_idle_older_than(threshold, self.clock.now_nanos())
    }

    /// Warn if buckets idle for `threshold` may not have refilled yet.
    ///
    /// Evicting such a bucket hands the client a full one early.
    pub(crate) fn warn_if_lossy_threshold(&self, threshold: Duration) {
        let full_refill = self.limits.full_refill();
        if threshold < full_refill {
            warn!(
                target: "tollgate::store",
                threshold = ?threshold,
                full_refill = ?full_refill,
                "idle threshold shorter than full refill; evicted clients get a fresh bucket early"
            );
        }
    }

    /// Copy of `key`'s bucket, if present.
    pub fn snapshot(&self, key: &ClientKey) -> Option<TokenBucket> {
        self.buckets.get(key).map(|bucket| *bucket)
    }

    /// Whether `key` currently has a bucket.
    pub fn contains(&self, key: &ClientKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}
