//! A concurrent hash map that resizes itself in the background.
//!
//! [`TideMap`] shards its entries over independently locked buckets and keeps
//! growing and shrinking the bucket array *while operations continue*, instead
//! of stopping the world behind a global lock. Mutations that push the table
//! past its load thresholds signal a per-map maintainer thread; the maintainer
//! builds a successor table, drains the old buckets over a bounded worker
//! pool, and swaps the successor in atomically. Operations that land on an
//! already-drained bucket transparently replay against the successor, so the
//! handoff is invisible to callers.
//!
//! The map is built for high-concurrency point operations on numeric ids, the
//! access pattern of connection registries, session tables, and membership
//! caches. There is deliberately no iteration or range API.
//!
//! ```
//! use tidemap::TideMap;
//!
//! let sessions = TideMap::new();
//! sessions.insert(11i64, "alice");
//! sessions.insert(12i64, "bob");
//!
//! assert_eq!(sessions.get(&11), Some("alice"));
//! assert_eq!(sessions.remove(&12), Some("bob"));
//! assert!(!sessions.contains_key(&12));
//! ```

mod lock;
mod resize;
mod table;

use crate::lock::RwLock;
use crate::resize::Signal;
use crate::table::{initial_buckets, BucketTable, Outcome, PENDING_NONE};
use ahash::RandomState;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// State shared between the facade and its maintainer thread.
///
/// Lock order is fixed: `topology` before `phase` before any bucket lock.
/// Operations take both shared; the maintainer takes `phase` exclusively to
/// open a resize window and both exclusively for the cutover. Reversing the
/// order anywhere would deadlock against those exclusive holds.
pub(crate) struct Shared<K, V, S> {
    /// Which table is current.
    pub(crate) topology: RwLock<Arc<BucketTable<K, V, S>>>,
    /// `Some(successor)` exactly while a resize is in flight. Operations that
    /// hit a retired bucket in the current table replay here.
    pub(crate) phase: RwLock<Option<Arc<BucketTable<K, V, S>>>>,
    pub(crate) shutdown: AtomicBool,
}

/// Concurrent hash map that grows and shrinks in the background while under
/// load.
///
/// Reads take a shared bucket lock, writes an exclusive one; there is no
/// global lock on the data path. Values are returned by clone, so large
/// payloads are typically stored behind an [`Arc`].
///
/// Dropping the map shuts down and joins its maintainer thread.
pub struct TideMap<K, V, S = RandomState> {
    shared: Arc<Shared<K, V, S>>,
    signal: SyncSender<Signal>,
    maintainer: Option<JoinHandle<()>>,
}

impl<K, V> TideMap<K, V, RandomState>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_capacity_and_hasher(0, RandomState::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> TideMap<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let (signal, signals) = mpsc::sync_channel(1);
        let table = BucketTable::new(
            initial_buckets(capacity),
            PENDING_NONE,
            Arc::new(hash_builder),
            signal.clone(),
        );
        let shared = Arc::new(Shared {
            topology: RwLock::new(Arc::new(table)),
            phase: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        });

        let maintainer = {
            let shared = Arc::clone(&shared);
            let sender = signal.clone();
            thread::Builder::new()
                .name("tidemap-maintainer".into())
                .spawn(move || resize::run(shared, signals, sender))
                .expect("failed to spawn the tidemap maintainer thread")
        };

        Self {
            shared,
            signal,
            maintainer: Some(maintainer),
        }
    }

    /// Inserts a key/value pair, returning the previous value if the key was
    /// already present.
    ///
    /// ```
    /// use tidemap::TideMap;
    ///
    /// let map = TideMap::new();
    /// assert_eq!(map.insert(3i64, 6), None);
    /// assert_eq!(map.insert(3i64, 7), Some(6));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match current.insert(key, value) {
            Outcome::Done(previous) => previous,
            Outcome::Moved((key, value)) => successor(&phase).insert(key, value).done(),
        }
    }

    /// Returns a clone of the value stored for `key`, or `None` if the key is
    /// absent from the map.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
        V: Clone,
    {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match current.get(key) {
            Outcome::Done(found) => found,
            Outcome::Moved(()) => successor(&phase).get(key).done(),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match current.contains(key) {
            Outcome::Done(present) => present,
            Outcome::Moved(()) => successor(&phase).contains(key).done(),
        }
    }

    /// Removes `key`, returning its value if it was present. Removing an
    /// absent key is a no-op.
    ///
    /// ```
    /// use tidemap::TideMap;
    ///
    /// let map: TideMap<i64, i64> = TideMap::new();
    /// assert_eq!(map.remove(&999), None);
    /// ```
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq + Hash,
    {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match current.remove(key) {
            Outcome::Done(removed) => removed,
            Outcome::Moved(()) => successor(&phase).remove(key).done(),
        }
    }

    /// Returns the value stored for `key`, inserting `value` first if the key
    /// is absent. The boolean is `true` iff the key already existed; in that
    /// case the resident value wins and `value` is discarded.
    ///
    /// This is the map's only compound atomic primitive: of any number of
    /// racing callers for one key, exactly one inserts, and every caller gets
    /// the single stored value back.
    ///
    /// ```
    /// use tidemap::TideMap;
    ///
    /// let map = TideMap::new();
    /// assert_eq!(map.get_or_insert(42i64, "a"), ("a", false));
    /// assert_eq!(map.get_or_insert(42i64, "b"), ("a", true));
    /// ```
    pub fn get_or_insert(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match current.get_or_insert(key, value) {
            Outcome::Done(result) => result,
            Outcome::Moved((key, value)) => successor(&phase).get_or_insert(key, value).done(),
        }
    }

    /// Number of live entries. While a resize is migrating entries this is a
    /// moment-in-time estimate; it is exact whenever the map is quiescent.
    pub fn len(&self) -> usize {
        let current = self.shared.topology.read();
        let phase = self.shared.phase.read();
        match &*phase {
            Some(next) => current.len() + next.len(),
            None => current.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket count. Grows and shrinks in powers of two, never below
    /// the floor of 16.
    pub fn capacity(&self) -> usize {
        self.shared.topology.read().capacity()
    }
}

/// Looks up the successor table during a resize window. An operation only
/// lands here after the current table reported a retired bucket, which cannot
/// happen outside a resize: the phase it observed is pinned by the shared
/// locks it still holds.
fn successor<K, V, S>(phase: &Option<Arc<BucketTable<K, V, S>>>) -> &BucketTable<K, V, S> {
    match phase {
        Some(next) => next,
        None => unreachable!("bucket retired outside a resize window"),
    }
}

impl<K, V> Default for TideMap<K, V, RandomState>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Extend<(K, V)> for TideMap<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for TideMap<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::with_capacity_and_hasher(0, S::default());
        map.extend(iter);
        map
    }
}

impl<K, V, S> fmt::Debug for TideMap<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TideMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<K, V, S> Drop for TideMap<K, V, S> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Blocking send: the maintainer always drains the channel, so the
        // shutdown signal is delivered even if a resize request is queued
        // ahead of it. Err here means the maintainer already exited.
        let _ = self.signal.send(Signal::Shutdown);
        if let Some(maintainer) = self.maintainer.take() {
            let _ = maintainer.join();
        }
    }
}
