use crate::table::{BucketTable, MIN_BUCKETS, PENDING_GROW, PENDING_SHRINK};
use crate::Shared;
use once_cell::sync::Lazy;
use std::cmp;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ResizeOp {
    Grow,
    Shrink,
}

impl ResizeOp {
    pub(crate) fn pending_flag(self) -> u8 {
        match self {
            ResizeOp::Grow => PENDING_GROW,
            ResizeOp::Shrink => PENDING_SHRINK,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Signal {
    Resize(ResizeOp),
    Shutdown,
}

static MIGRATION_WORKERS: Lazy<usize> = Lazy::new(|| {
    thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1)
});

/// Maintainer loop: one per map, alive for the map's whole lifetime. Blocks on
/// the signal channel while quiescent and runs one full resize per signal.
pub(crate) fn run<K, V, S>(
    shared: Arc<Shared<K, V, S>>,
    signals: Receiver<Signal>,
    sender: SyncSender<Signal>,
) where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    while let Ok(signal) = signals.recv() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        match signal {
            Signal::Shutdown => break,
            Signal::Resize(op) => resize(&shared, op, &sender),
        }
    }
}

fn resize<K, V, S>(shared: &Shared<K, V, S>, op: ResizeOp, sender: &SyncSender<Signal>)
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    let old = Arc::clone(&*shared.topology.read());
    let target = target_capacity(op, old.len(), old.capacity());
    // The successor inherits the in-flight kind so its own threshold checks
    // cannot request another resize before the cutover re-arms them.
    let next = Arc::new(BucketTable::new(
        target,
        op.pending_flag(),
        Arc::clone(old.hash_builder()),
        sender.clone(),
    ));

    // Publish the successor: from here every operation consults old-then-new.
    *shared.phase.write() = Some(Arc::clone(&next));

    migrate(&old, &next);

    // Cutover. Topology before phase, the one fixed order; operations acquire
    // these shared in the same order, so the exclusive holds cannot deadlock.
    let mut current = shared.topology.write();
    let mut phase = shared.phase.write();
    next.clear_pending();
    *current = next;
    *phase = None;
}

/// Migrates every bucket of `old` into `next`, fanning the bucket range out
/// over a bounded worker pool in disjoint contiguous chunks.
fn migrate<K, V, S>(old: &BucketTable<K, V, S>, next: &BucketTable<K, V, S>)
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    S: BuildHasher + Send + Sync,
{
    let workers = cmp::min(*MIGRATION_WORKERS, old.capacity());
    let span = (old.capacity() + workers - 1) / workers;

    thread::scope(|scope| {
        for chunk in old.bucket_slots().chunks(span) {
            scope.spawn(move || {
                for slot in chunk {
                    let mut bucket = slot.write();
                    let drained = bucket.retire();
                    if !drained.is_empty() {
                        old.sub_len(drained.len());
                    }
                    for (key, value) in drained {
                        // A table under construction has no retired buckets,
                        // so the insert cannot bounce.
                        let _ = next.insert(key, value);
                    }
                    // The bucket lock is held until here: a chain is never
                    // visible half in one table and half in the other.
                }
            });
        }
    });
}

/// Sizes the successor from the live-count snapshot. Growth also doubles the
/// current capacity at minimum, which keeps a chain-overflow trigger at low
/// load from producing a same-size successor; shrink clamps to the floor.
fn target_capacity(op: ResizeOp, live: usize, capacity: usize) -> usize {
    match op {
        ResizeOp::Grow => cmp::max(
            capacity.saturating_mul(2),
            live.saturating_mul(2).next_power_of_two(),
        ),
        ResizeOp::Shrink => cmp::max(MIN_BUCKETS, (live / 2).next_power_of_two()),
    }
}

#[cfg(test)]
mod tests {
    use super::{target_capacity, ResizeOp};
    use crate::table::MIN_BUCKETS;

    #[test]
    fn grow_targets_twice_the_live_count() {
        assert_eq!(target_capacity(ResizeOp::Grow, 104, 16), 256);
        assert_eq!(target_capacity(ResizeOp::Grow, 1_000, 16), 2_048);
    }

    #[test]
    fn grow_is_always_strictly_larger() {
        // Chain overflow can fire while the live count is small relative to
        // the table; the successor must still be bigger than what it replaces.
        assert_eq!(target_capacity(ResizeOp::Grow, 1_024, 2_048), 4_096);
        assert_eq!(target_capacity(ResizeOp::Grow, 0, 16), 32);
    }

    #[test]
    fn shrink_clamps_to_the_floor() {
        assert_eq!(target_capacity(ResizeOp::Shrink, 0, 512), MIN_BUCKETS);
        assert_eq!(target_capacity(ResizeOp::Shrink, 25, 512), MIN_BUCKETS);
        assert_eq!(target_capacity(ResizeOp::Shrink, 100, 1_024), 64);
    }
}
