use std::any::type_name;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::metrics::{BORROWS, DRAIN_RECORDS, DRAINS};
use crate::{Error, Lease, Reclaim, Registry, Shape};

/// Tracks every object borrowed during one request and returns them all when the request
/// is drained.
///
/// A factory is obtained with [`Registry::acquire()`] (usually via [`acquire()`][crate::acquire]
/// when a request starts) and is cheap to clone. Any clone can borrow objects; the first clone
/// to call [`drain()`][Self::drain] resets every borrowed object, returns it to its freelist
/// and then hands the factory itself back to the registry for a future request.
///
/// Draining happens at most once. Later drain calls, and borrows after the drain, are
/// rejected even if the underlying factory has meanwhile been handed to another request.
///
/// # Thread safety
///
/// Borrowing may happen concurrently from any number of threads serving the same request.
/// Draining must only happen after all borrowing for the request has finished; the
/// request's completion is the point where that is known to be true.
///
/// # Example
///
/// ```
/// use request_pool::{Registry, Shape};
///
/// const SCRATCH: Shape<String> = Shape::new("scratch").with_capacity(256);
///
/// let registry = Registry::builder().register_recyclable(SCRATCH).build();
///
/// let factory = registry.acquire();
/// let scratch = factory.borrow(&SCRATCH);
/// scratch.lock().push_str("request data");
///
/// assert_eq!(factory.len(), 1);
/// assert!(factory.drain());
///
/// // The next request gets the same string back, emptied.
/// let factory = registry.acquire();
/// let reused = factory.borrow(&SCRATCH);
/// assert!(reused.lock().is_empty());
/// assert!(reused.lock().capacity() >= 256);
/// # factory.drain();
/// ```
#[derive(Clone)]
pub struct RequestFactory {
    registry: Registry,
    core: Arc<FactoryCore>,

    // The epoch the core had when this request acquired it. The core's epoch moves on when
    // the request drains, which is how stale handles recognize themselves.
    epoch: u64,
}

impl RequestFactory {
    pub(crate) fn acquire(registry: &Registry) -> Self {
        let core = registry.take_factory();

        // Free factories have an even epoch, acquired ones an odd epoch.
        let epoch = core.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        debug_assert!(epoch % 2 == 1, "acquired a request factory that was not free");

        debug!(epoch, "request factory acquired");

        Self {
            registry: registry.clone(),
            core,
            epoch,
        }
    }

    /// Borrows an object of the given shape for the rest of the request.
    ///
    /// The object is an idle one from the shape's freelist if available, otherwise a newly
    /// created one. Either way it is in the state the shape's create or reset function
    /// leaves it in.
    ///
    /// # Panics
    ///
    /// Panics if the shape is not registered, is registered for a different object type, or
    /// if the request has already been drained. All of these are programming errors.
    #[must_use]
    pub fn borrow<T>(&self, shape: &Shape<T>) -> Lease<T>
    where
        T: Send + 'static,
    {
        self.try_borrow(shape)
            .unwrap_or_else(|error| panic!("cannot borrow from request pool: {error}"))
    }

    /// Borrows an object of the given shape, reporting usage errors instead of panicking.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredShape`] or [`Error::ShapeTypeMismatch`] if the shape cannot be
    /// resolved, [`Error::Drained`] if the request has already been drained.
    pub fn try_borrow<T>(&self, shape: &Shape<T>) -> crate::Result<Lease<T>>
    where
        T: Send + 'static,
    {
        let freelist = self.registry.freelist(shape)?;

        // Not bundled with the record append below; the two are only atomic with respect to
        // each other, not with respect to a concurrent drain. The epoch check under the lock
        // keeps a late borrow from landing in a factory that already moved on.
        let (slot, reused) = freelist.take();
        let lease = Lease::new(Arc::clone(&slot));

        {
            let mut records = self.core.records.lock();

            if self.core.epoch.load(Ordering::Acquire) != self.epoch {
                drop(records);
                drop(lease);
                freelist.restore(slot);
                return Err(Error::Drained);
            }

            records.push(PendingRelease { object: slot });
        }

        freelist.record_checkout(reused);

        BORROWS.with(|e| e.observe_once());
        trace!(shape = shape.name(), epoch = self.epoch, "object borrowed");

        Ok(lease)
    }

    /// Resets every object borrowed through this factory, in borrow order, returns each to
    /// its freelist and then returns the factory to the registry for reuse.
    ///
    /// Returns `true` if this call performed the drain and `false` if the request had already
    /// been drained, in which case nothing happens.
    ///
    /// Leases obtained from this factory expire as part of the drain.
    pub fn drain(&self) -> bool {
        // The one-shot transition out of the acquired state. Only one caller can win it.
        if self
            .core
            .epoch
            .compare_exchange(
                self.epoch,
                self.epoch.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(epoch = self.epoch, "request factory drained more than once; ignoring");
            return false;
        }

        // Reset functions run without holding the records lock. Any borrow racing with us
        // sees the new epoch under the lock and backs off, so nothing new arrives meanwhile.
        let mut pending = mem::take(&mut *self.core.records.lock());
        let count = pending.len();

        let recycled = pending
            .drain(..)
            .map(PendingRelease::release)
            .filter(|recycled| *recycled)
            .count();

        // Hand the (now empty) record storage back so its capacity serves the next request.
        *self.core.records.lock() = pending;

        self.registry.return_factory(Arc::clone(&self.core));

        DRAINS.with(|e| e.observe_once());
        DRAIN_RECORDS.with(|e| e.observe(count));
        debug!(
            epoch = self.epoch,
            records = count,
            recycled,
            "request factory drained"
        );

        true
    }

    /// Number of objects borrowed through this factory and not yet returned.
    ///
    /// Zero once the request has been drained.
    #[must_use]
    pub fn len(&self) -> usize {
        let records = self.core.records.lock();

        if self.is_drained() { 0 } else { records.len() }
    }

    /// Whether no objects are pending release.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the request this handle belongs to has been drained.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.core.epoch.load(Ordering::Acquire) != self.epoch
    }

    /// The registry this factory borrows from.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Wraps the factory in a guard that drains it when the guard goes out of scope.
    ///
    /// Use this when the request is served within one scope and objects can be returned as
    /// soon as the scope exits, without waiting for a completion signal.
    ///
    /// # Example
    ///
    /// ```
    /// use request_pool::{Registry, Shape};
    ///
    /// const BUF: Shape<Vec<u8>> = Shape::new("buf").with_capacity(1024);
    ///
    /// let registry = Registry::builder().register_recyclable(BUF).build();
    ///
    /// {
    ///     let scope = registry.acquire().drain_on_drop();
    ///     scope.borrow(&BUF).lock().extend_from_slice(b"payload");
    /// }
    ///
    /// assert_eq!(registry.freelist(&BUF).unwrap().len(), 1);
    /// ```
    pub fn drain_on_drop(self) -> DrainGuard {
        DrainGuard {
            factory: Some(self),
        }
    }
}

impl fmt::Debug for RequestFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("epoch", &self.epoch)
            .field("drained", &self.is_drained())
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// The pooled part of a [`RequestFactory`]: the record sequence and the epoch counter.
pub(crate) struct FactoryCore {
    epoch: AtomicU64,
    records: Mutex<Vec<PendingRelease>>,
}

impl FactoryCore {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            records: Mutex::new(Vec::new()),
        }
    }
}

impl fmt::Debug for FactoryCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field(
                "records",
                &self.records.try_lock().map(|records| records.len()),
            )
            .finish()
    }
}

/// One borrowed object waiting to be reset and returned when its request drains.
struct PendingRelease {
    object: Arc<dyn Reclaim>,
}

impl PendingRelease {
    fn release(self) -> bool {
        self.object.reclaim()
    }
}

/// Drains a [`RequestFactory`] when dropped.
///
/// Created by [`RequestFactory::drain_on_drop()`]. Dereferences to the factory, so objects
/// can be borrowed through the guard directly.
#[derive(Debug)]
pub struct DrainGuard {
    factory: Option<RequestFactory>,
}

impl DrainGuard {
    /// Releases the factory without draining it.
    #[must_use]
    pub fn disarm(mut self) -> RequestFactory {
        self.factory
            .take()
            .expect("factory is only taken by disarm(), which consumes the guard")
    }
}

impl Deref for DrainGuard {
    type Target = RequestFactory;

    fn deref(&self) -> &Self::Target {
        self.factory
            .as_ref()
            .expect("factory is only taken by disarm(), which consumes the guard")
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if let Some(factory) = self.factory.take() {
            factory.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RequestFactory: Send, Sync, Clone);
    assert_impl_all!(DrainGuard: Send, Sync);

    const COUNTER: Shape<u64> = Shape::new("counter");
    const BYTES: Shape<Vec<u8>> = Shape::new("bytes").with_capacity(8);

    fn registry() -> Registry {
        Registry::builder()
            .register(COUNTER, |_| 0, |value| *value = 0)
            .register_recyclable(BYTES)
            .build()
    }

    #[test]
    fn borrow_records_each_object() {
        let registry = registry();
        let factory = registry.acquire();

        let _a = factory.borrow(&COUNTER);
        let _b = factory.borrow(&COUNTER);
        let _c = factory.borrow(&BYTES);

        assert_eq!(factory.len(), 3);
        assert!(!factory.is_empty());
    }

    #[test]
    fn drain_resets_and_returns_objects() {
        let registry = registry();
        let factory = registry.acquire();

        let counter = factory.borrow(&COUNTER);
        *counter.lock() = 5;

        assert!(factory.drain());
        assert!(factory.is_drained());
        assert_eq!(factory.len(), 0);
        assert_eq!(registry.freelist(&COUNTER).unwrap().len(), 1);

        let factory = registry.acquire();
        let again = factory.borrow(&COUNTER);
        assert_eq!(*again.lock(), 0);
        assert!(Lease::ptr_eq(&counter, &again));
    }

    #[test]
    fn drain_runs_at_most_once() {
        let registry = registry();
        let factory = registry.acquire();
        let clone = factory.clone();

        let _lease = factory.borrow(&COUNTER);

        assert!(factory.drain());
        assert!(!factory.drain());
        assert!(!clone.drain());

        assert_eq!(registry.freelist(&COUNTER).unwrap().stats().returns, 1);
        assert_eq!(registry.idle_factories(), 1);
    }

    #[test]
    fn stale_handle_does_not_drain_next_request() {
        let registry = registry();

        let first = registry.acquire();
        assert!(first.drain());

        // Reuses the same core.
        let second = registry.acquire();
        let lease = second.borrow(&COUNTER);

        assert!(!first.drain());
        assert!(lease.is_live());
        assert_eq!(second.len(), 1);
        assert_eq!(first.len(), 0);
    }

    #[test]
    fn borrow_after_drain_is_rejected() {
        let registry = registry();
        let factory = registry.acquire();
        factory.drain();

        assert!(matches!(factory.try_borrow(&COUNTER), Err(Error::Drained)));

        // The object we took for the rejected borrow went straight back, uncounted.
        let freelist = registry.freelist(&COUNTER).unwrap();
        assert_eq!(freelist.len(), 1);
        assert_eq!(freelist.stats().misses, 0);
        assert_eq!(freelist.stats().returns, 0);
    }

    #[test]
    fn rejected_borrows_leave_stats_untouched() {
        let registry = registry();

        let warm = registry.acquire();
        let _lease = warm.borrow(&COUNTER);
        warm.drain();

        let stale = registry.acquire();
        stale.drain();

        for _ in 0..100 {
            assert!(matches!(stale.try_borrow(&COUNTER), Err(Error::Drained)));
        }

        let stats = registry.freelist(&COUNTER).unwrap().stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.returns, 1);
    }

    #[test]
    #[should_panic]
    fn borrow_unregistered_panics() {
        let registry = registry();
        let factory = registry.acquire();

        let _lease = factory.borrow(&Shape::<String>::new("nope"));
    }

    #[test]
    fn drain_processes_in_borrow_order() {
        static ORDER: AtomicUsize = AtomicUsize::new(0);
        const TAGGED: Shape<(usize, usize)> = Shape::new("tagged");

        let registry = Registry::builder()
            .register(
                TAGGED,
                |_| (0, 0),
                |value| value.1 = ORDER.fetch_add(1, Ordering::Relaxed),
            )
            .build();

        let factory = registry.acquire();
        let leases: Vec<_> = (0..5)
            .map(|i| {
                let lease = factory.borrow(&TAGGED);
                lease.lock().0 = i;
                lease
            })
            .collect();
        drop(leases);

        let start = ORDER.load(Ordering::Relaxed);
        factory.drain();

        let freelist = registry.freelist(&TAGGED).unwrap();
        assert_eq!(freelist.len(), 5);

        // Each object remembers the position it was reset at. Borrow index i was reset i-th.
        let factory = registry.acquire();
        let mut seen: Vec<_> = (0..5)
            .map(|_| {
                let lease = factory.borrow(&TAGGED);
                let value = *lease.lock();
                value
            })
            .collect();
        seen.sort_unstable();

        for (i, (tag, reset_at)) in seen.into_iter().enumerate() {
            assert_eq!(tag, i);
            assert_eq!(reset_at, start + i);
        }
    }

    #[test]
    fn reset_panic_does_not_stop_drain() {
        const FRAGILE: Shape<u32> = Shape::new("fragile");

        let registry = Registry::builder()
            .register(
                FRAGILE,
                |_| 0,
                |value| {
                    assert!(*value != 13, "unlucky value");
                    *value = 0;
                },
            )
            .register(COUNTER, |_| 0, |value| *value = 0)
            .build();

        let factory = registry.acquire();
        *factory.borrow(&FRAGILE).lock() = 13;
        *factory.borrow(&COUNTER).lock() = 7;

        assert!(factory.drain());

        assert!(registry.freelist(&FRAGILE).unwrap().is_empty());
        assert_eq!(registry.freelist(&COUNTER).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_borrows_are_all_recorded() {
        let registry = registry();
        let factory = registry.acquire();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        let lease = factory.borrow(&BYTES);
                        lease.lock().push(1);
                    }
                });
            }
        });

        assert_eq!(factory.len(), 100);
        assert!(factory.drain());
        assert_eq!(registry.freelist(&BYTES).unwrap().len(), 100);
    }

    #[test]
    fn guard_drains_on_drop() {
        let registry = registry();

        let lease = {
            let guard = registry.acquire().drain_on_drop();
            guard.borrow(&COUNTER)
        };

        assert!(!lease.is_live());
        assert_eq!(registry.freelist(&COUNTER).unwrap().len(), 1);
    }

    #[test]
    fn disarmed_guard_does_not_drain() {
        let registry = registry();

        let factory = {
            let guard = registry.acquire().drain_on_drop();
            let _lease = guard.borrow(&COUNTER);
            guard.disarm()
        };

        assert!(!factory.is_drained());
        assert_eq!(factory.len(), 1);
    }
}
