use std::any::{Any, type_name};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use scc::Bag;
use tracing::error;

use crate::metrics::RESET_PANICS;

pub(crate) type CreateFn<T> = Box<dyn Fn(usize) -> T + Send + Sync>;
pub(crate) type ResetFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// The concurrent bag of reusable objects behind one registered [`Shape`][crate::Shape].
///
/// A freelist hands out an idle object if it has one and creates a new one otherwise. Objects
/// come back to it when the request that borrowed them is drained, after being reset.
///
/// The freelist is unbounded and never evicts. Returning an object is best effort: an object
/// whose reset function panics is discarded instead of being returned.
///
/// Freelists are owned by the [`Registry`][crate::Registry] and are only reachable through it.
/// Objects are borrowed from them via a [`RequestFactory`][crate::RequestFactory].
pub struct Freelist<T> {
    name: &'static str,
    capacity: usize,
    create: CreateFn<T>,
    reset: ResetFn<T>,

    idle: Bag<Arc<Slot<T>>>,

    // Handed to every slot we create, so a slot can find its way home when its request drains.
    self_ref: Weak<Self>,

    hits: AtomicUsize,
    misses: AtomicUsize,
    returns: AtomicUsize,
}

impl<T> Freelist<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        name: &'static str,
        capacity: usize,
        create: CreateFn<T>,
        reset: ResetFn<T>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name,
            capacity,
            create,
            reset,
            idle: Bag::default(),
            self_ref: self_ref.clone(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
        })
    }

    /// The name of the shape this freelist serves.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The capacity hint passed to the create function.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle objects currently held for reuse.
    #[must_use]
    pub fn len(&self) -> usize {
        self.idle.len()
    }

    /// Whether the freelist holds no idle objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }

    /// Returns a snapshot of the freelist counters.
    #[must_use]
    pub fn stats(&self) -> FreelistStats {
        FreelistStats {
            idle: self.idle.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
        }
    }

    /// Takes an idle slot, or creates a new one if none is idle.
    #[cfg(test)]
    pub(crate) fn get(&self) -> Arc<Slot<T>> {
        let (slot, reused) = self.take();
        self.record_checkout(reused);
        slot
    }

    /// Takes an idle slot, or creates a new one if none is idle. Returns whether the slot was
    /// reused.
    ///
    /// The caller either confirms the checkout with `record_checkout()` or hands the slot
    /// back with `restore()`.
    pub(crate) fn take(&self) -> (Arc<Slot<T>>, bool) {
        if let Some(slot) = self.idle.pop() {
            return (slot, true);
        }

        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState {
                value: (self.create)(self.capacity),
                generation: 0,
            }),
            home: self.self_ref.clone(),
        });

        (slot, false)
    }

    pub(crate) fn record_checkout(&self, reused: bool) {
        if reused {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Puts back a slot from `take()` whose checkout did not go through. The slot was never
    /// handed out, so it needs no reset and is not counted as a return.
    pub(crate) fn restore(&self, slot: Arc<Slot<T>>) {
        self.idle.push(slot);
    }

    /// Makes a slot available to the next `get()`.
    pub(crate) fn put(&self, slot: Arc<Slot<T>>) {
        self.idle.push(slot);
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets the value in the slot, invalidates every lease on it and returns it to the
    /// idle set.
    ///
    /// Returns `false` if the reset function panicked, in which case the slot is discarded.
    fn recycle(&self, slot: Arc<Slot<T>>) -> bool {
        let reset_result = {
            let mut state = slot.state.lock();

            // Leases are invalidated even if the reset fails, so nobody can keep using an
            // object that is in an unknown state.
            state.generation = state.generation.wrapping_add(1);

            panic::catch_unwind(AssertUnwindSafe(|| (self.reset)(&mut state.value)))
        };

        match reset_result {
            Ok(()) => {
                self.put(slot);
                true
            }
            Err(payload) => {
                RESET_PANICS.with(|e| e.observe_once());

                error!(
                    shape = self.name,
                    panic_message = %format_panic_payload(&payload),
                    "reset function panicked; the object was discarded instead of recycled"
                );

                false
            }
        }
    }
}

impl<T> fmt::Debug for Freelist<T>
where
    T: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("idle", &self.idle.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("returns", &self.returns.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Point-in-time counters of one [`Freelist`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct FreelistStats {
    /// Idle objects held for reuse.
    pub idle: usize,

    /// Borrows served from an idle object.
    pub hits: usize,

    /// Borrows that had to create a new object.
    pub misses: usize,

    /// Objects returned after a drain.
    pub returns: usize,
}

impl FreelistStats {
    /// Fraction of borrows served by reuse, from 0.0 to 1.0.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "precision loss is irrelevant for a ratio used in diagnostics"
    )]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);

        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// One recyclable object together with the bookkeeping needed to hand it out and take it back.
///
/// The generation increases every time the object is recycled, so leases created before a
/// drain can tell that the object is no longer theirs.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
    home: Weak<Freelist<T>>,
}

pub(crate) struct SlotState<T> {
    pub(crate) value: T,
    pub(crate) generation: u64,
}

impl<T> Slot<T> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field(
                "generation",
                &self.state.try_lock().map(|state| state.generation),
            )
            .finish_non_exhaustive()
    }
}

/// Type-erased "send this object home" operation, so one request can track objects of many
/// shapes in a single sequence.
pub(crate) trait Reclaim: Send + Sync {
    /// Resets the object and returns it to its freelist. Returns whether it was recycled.
    fn reclaim(self: Arc<Self>) -> bool;
}

impl<T> Reclaim for Slot<T>
where
    T: Send + 'static,
{
    fn reclaim(self: Arc<Self>) -> bool {
        // If the registry is gone there is nowhere to return to; the object is simply dropped.
        match self.home.upgrade() {
            Some(home) => home.recycle(self),
            None => false,
        }
    }
}

/// Formats a panic payload for logging.
fn format_panic_payload(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Freelist<Vec<u8>>: Send, Sync);
    assert_impl_all!(Slot<Vec<u8>>: Send, Sync);

    fn vec_freelist() -> Arc<Freelist<Vec<u64>>> {
        Freelist::new(
            "vec",
            16,
            Box::new(Vec::with_capacity),
            Box::new(Vec::clear),
        )
    }

    #[test]
    fn get_creates_when_empty() {
        let freelist = vec_freelist();

        let slot = freelist.get();
        assert!(slot.lock().value.capacity() >= 16);

        let stats = freelist.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert!(freelist.is_empty());
    }

    #[test]
    fn put_then_get_reuses() {
        let freelist = vec_freelist();

        let slot = freelist.get();
        freelist.put(Arc::clone(&slot));
        assert_eq!(freelist.len(), 1);

        let again = freelist.get();
        assert!(Arc::ptr_eq(&slot, &again));

        let stats = freelist.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.returns, 1);
    }

    #[test]
    fn restored_slot_is_not_counted() {
        let freelist = vec_freelist();

        let (slot, reused) = freelist.take();
        assert!(!reused);
        freelist.restore(Arc::clone(&slot));

        assert_eq!(
            freelist.stats(),
            FreelistStats {
                idle: 1,
                hits: 0,
                misses: 0,
                returns: 0,
            }
        );

        let (again, reused) = freelist.take();
        assert!(reused);
        assert!(Arc::ptr_eq(&slot, &again));
        freelist.record_checkout(reused);

        assert_eq!(freelist.stats().hits, 1);
    }

    #[test]
    fn reclaim_resets_and_bumps_generation() {
        let freelist = vec_freelist();

        let slot = freelist.get();
        slot.lock().value.extend([1, 2, 3]);
        assert_eq!(slot.generation(), 0);

        assert!(Arc::clone(&slot).reclaim());

        assert_eq!(slot.generation(), 1);
        assert!(slot.lock().value.is_empty());
        assert_eq!(freelist.len(), 1);
    }

    #[test]
    fn panicking_reset_discards_object() {
        let resets = Arc::new(AtomicU32::new(0));
        let resets_clone = Arc::clone(&resets);

        let freelist: Arc<Freelist<u32>> = Freelist::new(
            "explosive",
            0,
            Box::new(|_| 0),
            Box::new(move |_| {
                resets_clone.fetch_add(1, Ordering::Relaxed);
                panic!("reset failed");
            }),
        );

        let slot = freelist.get();
        assert!(!Arc::clone(&slot).reclaim());

        assert_eq!(resets.load(Ordering::Relaxed), 1);
        assert!(freelist.is_empty());
        // The object is unusable through old leases even though it was not recycled.
        assert_eq!(slot.generation(), 1);
    }

    #[test]
    fn reclaim_without_home_drops_object() {
        let freelist = vec_freelist();
        let slot = freelist.get();
        drop(freelist);

        assert!(!slot.reclaim());
    }

    #[test]
    fn hit_rate() {
        let stats = FreelistStats {
            idle: 0,
            hits: 75,
            misses: 25,
            returns: 70,
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);

        assert!(FreelistStats::default().hit_rate().abs() < f64::EPSILON);
    }
}
