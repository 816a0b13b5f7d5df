use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasher;

/// Capability of a type whose instances can be recycled through a freelist.
///
/// Register such types with
/// [`RegistryBuilder::register_recyclable()`][crate::RegistryBuilder::register_recyclable]
/// instead of passing explicit create and reset functions.
///
/// `reset()` must restore the object to the state `create()` produces, as far as any later
/// borrower can observe. It should keep allocated capacity, since that is what makes reuse
/// worthwhile.
///
/// # Example
///
/// ```
/// use request_pool::Recycle;
///
/// #[derive(Debug, Default)]
/// struct Scratch {
///     name: String,
///     hits: u32,
/// }
///
/// impl Recycle for Scratch {
///     fn create(capacity: usize) -> Self {
///         Self {
///             name: String::with_capacity(capacity),
///             hits: 0,
///         }
///     }
///
///     fn reset(&mut self) {
///         self.name.clear();
///         self.hits = 0;
///     }
/// }
/// ```
pub trait Recycle: Sized {
    /// Creates a fresh object, using `capacity` as a sizing hint.
    fn create(capacity: usize) -> Self;

    /// Restores a used object to its freshly created state, in place.
    fn reset(&mut self);
}

impl<T> Recycle for Vec<T> {
    fn create(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Recycle for VecDeque<T> {
    fn create(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl Recycle for String {
    fn create(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl<K, V, S> Recycle for HashMap<K, V, S>
where
    S: BuildHasher + Default,
{
    fn create(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }

    fn reset(&mut self) {
        self.clear();
    }
}
