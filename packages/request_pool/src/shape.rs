use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

/// Describes one recyclable object shape: the object type, a registry-unique name and the
/// capacity hint handed to the create function.
///
/// Shapes are cheap `Copy` values, typically declared as constants next to the code that
/// borrows them. The type parameter ties every borrow to the type the shape was registered
/// with, so a borrowed object never needs to be downcast by the caller.
///
/// Two shapes with the same object type but different capacities are different shapes and
/// must use different names. Objects are never exchanged between shapes.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
///
/// use request_pool::Shape;
///
/// const COUNTS_1024: Shape<HashMap<u64, u64>> = Shape::new("counts").with_capacity(1024);
///
/// assert_eq!(COUNTS_1024.name(), "counts");
/// assert_eq!(COUNTS_1024.capacity(), 1024);
/// ```
pub struct Shape<T> {
    name: &'static str,
    capacity: usize,

    // A shape never owns a T, it only names one. This keeps Shape Send + Sync + Copy
    // regardless of T.
    _object: PhantomData<fn() -> T>,
}

impl<T> Shape<T> {
    /// Creates a shape with the given name and a capacity hint of zero.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            capacity: 0,
            _object: PhantomData,
        }
    }

    /// Sets the capacity hint passed to the create function of this shape.
    #[must_use]
    pub const fn with_capacity(self, capacity: usize) -> Self {
        Self {
            name: self.name,
            capacity,
            _object: PhantomData,
        }
    }

    /// The registry-unique name of the shape.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The capacity hint passed to the create function when a new object is needed.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Clone for Shape<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shape<T> {}

impl<T> fmt::Debug for Shape<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("object", &type_name::<T>())
            .finish()
    }
}
