use std::any::type_name;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::{Error, Slot, SlotState};

/// Access to one object borrowed through a [`RequestFactory`][crate::RequestFactory].
///
/// The lease is valid until the request it was borrowed under is drained. At that point the
/// object is reset and handed back to its freelist, where another request may pick it up.
/// Any attempt to use the lease after that fails instead of exposing the other request's
/// data.
///
/// Leases are cheap to clone, so several tasks serving the same request can share one object.
/// Access is serialized by a lock; [`lock()`][Self::lock] returns a guard that dereferences
/// to the object.
///
/// # Example
///
/// ```
/// use request_pool::{Registry, Shape};
///
/// const IDS: Shape<Vec<u64>> = Shape::new("ids").with_capacity(64);
///
/// let registry = Registry::builder().register_recyclable(IDS).build();
/// let factory = registry.acquire();
///
/// let ids = factory.borrow(&IDS);
/// ids.lock().extend([1, 2, 3]);
/// assert_eq!(ids.lock().len(), 3);
///
/// factory.drain();
/// assert!(!ids.is_live());
/// ```
pub struct Lease<T> {
    slot: Arc<Slot<T>>,
    generation: u64,
}

impl<T> Lease<T> {
    pub(crate) fn new(slot: Arc<Slot<T>>) -> Self {
        let generation = slot.generation();
        Self { slot, generation }
    }

    /// Locks the borrowed object for access.
    ///
    /// # Panics
    ///
    /// Panics if the request this lease was borrowed under has been drained.
    #[must_use]
    pub fn lock(&self) -> LeaseGuard<'_, T> {
        self.try_lock()
            .unwrap_or_else(|error| panic!("{error}: {}", type_name::<T>()))
    }

    /// Locks the borrowed object for access, or reports [`Error::Expired`] if the request
    /// this lease was borrowed under has been drained.
    pub fn try_lock(&self) -> crate::Result<LeaseGuard<'_, T>> {
        let state = self.slot.lock();

        // The generation only changes while the slot lock is held, so this check stays valid
        // for as long as the guard lives.
        if state.generation != self.generation {
            return Err(Error::Expired);
        }

        Ok(LeaseGuard { state })
    }

    /// Whether the lease still refers to an object owned by its request.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.slot.generation() == self.generation
    }

    /// Whether two leases refer to the same underlying pooled object, regardless of which
    /// request they were borrowed under.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.slot, &other.slot)
    }
}

impl<T> Clone for Lease<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            generation: self.generation,
        }
    }
}

impl<T> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("generation", &self.generation)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Locked access to a leased object. Dereferences to the object.
pub struct LeaseGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
}

impl<T> Deref for LeaseGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.state.value
    }
}

impl<T> DerefMut for LeaseGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state.value
    }
}

impl<T> fmt::Debug for LeaseGuard<'_, T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("value", &self.state.value)
            .finish()
    }
}
