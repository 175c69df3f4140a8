use crate::lock::RwLock;
use crate::resize::{ResizeOp, Signal};
use crossbeam_utils::CachePadded;
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::mem;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

pub(crate) const MIN_BUCKETS: usize = 1 << 4;

const GROW_LOAD_FACTOR: f64 = 6.5;
const SHRINK_LOAD_FACTOR: f64 = 0.1;
const MAX_CHAIN: usize = 1 << 10;

pub(crate) const PENDING_NONE: u8 = 0;
pub(crate) const PENDING_GROW: u8 = 1;
pub(crate) const PENDING_SHRINK: u8 = 2;

/// Result of probing one table. `Moved` means the bucket has been retired by a
/// migration and hands the operands back so the caller can replay them against
/// the successor table.
pub(crate) enum Outcome<T, R> {
    Done(T),
    Moved(R),
}

impl<T, R> Outcome<T, R> {
    /// Unwraps a probe that is known to have hit a live bucket.
    pub(crate) fn done(self) -> T {
        match self {
            Outcome::Done(value) => value,
            Outcome::Moved(_) => unreachable!("successor table has no retired buckets"),
        }
    }
}

pub(crate) struct Bucket<K, V> {
    moved: bool,
    entries: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            moved: false,
            entries: Vec::new(),
        }
    }

    /// Marks the bucket as moved and takes its chain. Migration-only; the
    /// caller must hold this bucket's write lock for the whole copy so that a
    /// chain is never split across two tables.
    pub(crate) fn retire(&mut self) -> Vec<(K, V)> {
        self.moved = true;
        mem::take(&mut self.entries)
    }
}

/// A fixed-capacity generation of the map. The bucket count is always a power
/// of two so the index mask is equivalent to `hash % capacity`.
pub(crate) struct BucketTable<K, V, S> {
    hash_builder: Arc<S>,
    len: AtomicUsize,
    pending: AtomicU8,
    signal: SyncSender<Signal>,
    buckets: Box<[CachePadded<RwLock<Bucket<K, V>>>]>,
}

/// Initial bucket count for a caller-provided capacity hint, assuming chains
/// stay comfortably below the growth threshold.
pub(crate) fn initial_buckets(capacity: usize) -> usize {
    MIN_BUCKETS.max((capacity / 4).next_power_of_two())
}

impl<K, V, S> BucketTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn new(
        bucket_count: usize,
        pending: u8,
        hash_builder: Arc<S>,
        signal: SyncSender<Signal>,
    ) -> Self {
        debug_assert!(bucket_count.is_power_of_two() && bucket_count >= MIN_BUCKETS);
        let buckets = (0..bucket_count)
            .map(|_| CachePadded::new(RwLock::new(Bucket::new())))
            .collect();

        Self {
            hash_builder,
            len: AtomicUsize::new(0),
            pending: AtomicU8::new(pending),
            signal,
            buckets,
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Outcome<Option<V>, ()>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
        V: Clone,
    {
        let bucket = self.bucket_for(key).read();
        if bucket.moved {
            return Outcome::Moved(());
        }

        Outcome::Done(
            bucket
                .entries
                .iter()
                .find(|(k, _)| k.borrow() == key)
                .map(|(_, v)| v.clone()),
        )
    }

    pub(crate) fn contains<Q>(&self, key: &Q) -> Outcome<bool, ()>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        let bucket = self.bucket_for(key).read();
        if bucket.moved {
            return Outcome::Moved(());
        }

        Outcome::Done(bucket.entries.iter().any(|(k, _)| k.borrow() == key))
    }

    pub(crate) fn insert(&self, key: K, value: V) -> Outcome<Option<V>, (K, V)> {
        let mut bucket = self.bucket_for(&key).write();
        if bucket.moved {
            return Outcome::Moved((key, value));
        }

        if let Some((_, slot)) = bucket.entries.iter_mut().find(|(k, _)| *k == key) {
            let previous = mem::replace(slot, value);
            self.maybe_request_resize(bucket.entries.len());
            return Outcome::Done(Some(previous));
        }

        bucket.entries.push((key, value));
        self.len.fetch_add(1, Ordering::Relaxed);
        self.maybe_request_resize(bucket.entries.len());
        Outcome::Done(None)
    }

    pub(crate) fn remove<Q>(&self, key: &Q) -> Outcome<Option<V>, ()>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        let mut bucket = self.bucket_for(key).write();
        if bucket.moved {
            return Outcome::Moved(());
        }

        match bucket.entries.iter().position(|(k, _)| k.borrow() == key) {
            Some(at) => {
                let (_, value) = bucket.entries.swap_remove(at);
                self.len.fetch_sub(1, Ordering::Relaxed);
                self.maybe_request_resize(bucket.entries.len());
                Outcome::Done(Some(value))
            }
            None => Outcome::Done(None),
        }
    }

    pub(crate) fn get_or_insert(&self, key: K, value: V) -> Outcome<(V, bool), (K, V)>
    where
        V: Clone,
    {
        let mut bucket = self.bucket_for(&key).write();
        if bucket.moved {
            return Outcome::Moved((key, value));
        }

        if let Some((_, resident)) = bucket.entries.iter().find(|(k, _)| *k == key) {
            return Outcome::Done((resident.clone(), true));
        }

        let stored = value.clone();
        bucket.entries.push((key, value));
        self.len.fetch_add(1, Ordering::Relaxed);
        self.maybe_request_resize(bucket.entries.len());
        Outcome::Done((stored, false))
    }

    fn bucket_for<Q>(&self, key: &Q) -> &RwLock<Bucket<K, V>>
    where
        Q: ?Sized + Hash,
    {
        let hash = self.hash_builder.hash_one(key);
        &self.buckets[hash as usize & (self.buckets.len() - 1)]
    }

    /// Re-evaluates the resize thresholds after a mutation, while the caller
    /// still holds the mutated bucket's lock. The `pending` transition is a
    /// single compare-exchange; losers rely on the winner's signal. The send
    /// cannot block: at most one signal is in flight per table generation and
    /// the channel holds one.
    fn maybe_request_resize(&self, chain_len: usize) {
        if self.pending.load(Ordering::SeqCst) != PENDING_NONE {
            return;
        }

        let load = self.len.load(Ordering::Relaxed) as f64 / self.buckets.len() as f64;
        if (load >= GROW_LOAD_FACTOR || chain_len >= MAX_CHAIN) && self.request(PENDING_GROW) {
            let _ = self.signal.try_send(Signal::Resize(ResizeOp::Grow));
        } else if load <= SHRINK_LOAD_FACTOR
            && self.buckets.len() > MIN_BUCKETS
            && self.request(PENDING_SHRINK)
        {
            let _ = self.signal.try_send(Signal::Resize(ResizeOp::Shrink));
        }
    }

    fn request(&self, op: u8) -> bool {
        self.pending
            .compare_exchange(PENDING_NONE, op, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl<K, V, S> BucketTable<K, V, S> {
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn sub_len(&self, moved: usize) {
        self.len.fetch_sub(moved, Ordering::Relaxed);
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn hash_builder(&self) -> &Arc<S> {
        &self.hash_builder
    }

    pub(crate) fn bucket_slots(&self) -> &[CachePadded<RwLock<Bucket<K, V>>>] {
        &self.buckets
    }

    /// Re-arms threshold evaluation once this table becomes current.
    pub(crate) fn clear_pending(&self) {
        self.pending.store(PENDING_NONE, Ordering::SeqCst);
    }
}
