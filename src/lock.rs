use lock_api::GuardSend;
use parking_lot_core::SpinWait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

const WRITER_BIT: u32 = 1 << 31;
const PENDING_BIT: u32 = 1 << 30;
const READER_MASK: u32 = PENDING_BIT - 1;

pub(crate) type RwLock<T> = lock_api::RwLock<RawRwLock, T>;

/// Writer-preferring reader/writer lock. A waiting writer raises the pending
/// bit, which stops new readers from entering; without it the read-mostly data
/// path could starve the maintainer's exclusive acquisitions indefinitely.
pub(crate) struct RawRwLock {
    state: AtomicU32,
}

unsafe impl lock_api::RawRwLock for RawRwLock {
    type GuardMarker = GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawRwLock {
        state: AtomicU32::new(0),
    };

    fn lock_shared(&self) {
        let mut spin = SpinWait::new();
        while !self.try_lock_shared() {
            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    fn try_lock_shared(&self) -> bool {
        let state = self.state.load(Ordering::Relaxed);
        if state & (WRITER_BIT | PENDING_BIT) != 0 {
            return false;
        }

        self.state
            .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock_shared(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }

    fn lock_exclusive(&self) {
        let mut spin = SpinWait::new();
        loop {
            let state = self.state.fetch_or(PENDING_BIT, Ordering::Acquire);
            if state & (WRITER_BIT | READER_MASK) == 0
                && self
                    .state
                    .compare_exchange(PENDING_BIT, WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            if !spin.spin() {
                thread::yield_now();
            }
        }
    }

    fn try_lock_exclusive(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock_exclusive(&self) {
        // Clears any pending bit along with the writer bit; a still-waiting
        // writer re-arms it on its next spin iteration.
        self.state.store(0, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & (WRITER_BIT | READER_MASK) != 0
    }

    fn is_locked_exclusive(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER_BIT != 0
    }
}
