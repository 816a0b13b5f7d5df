use std::any::{Any, type_name};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use foldhash::fast::RandomState;
use scc::Bag;

use crate::{Error, FactoryCore, Freelist, Recycle, RequestFactory, Shape};

/// The set of recyclable shapes known to the process, with one [`Freelist`] per shape.
///
/// A registry is built once at startup with [`Registry::builder()`] and is immutable after
/// that, so lookups need no locking. It is a cheap handle: clones share the same shapes,
/// freelists and request factories.
///
/// The registry also keeps the freelist of [`RequestFactory`] instances, so that acquiring a
/// factory for a new request does not allocate once the process is warmed up.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
///
/// use request_pool::{Registry, Shape};
///
/// const COUNTS: Shape<HashMap<u64, u64>> = Shape::new("counts").with_capacity(1024);
/// const LABELS: Shape<Vec<String>> = Shape::new("labels").with_capacity(16);
///
/// let registry = Registry::builder()
///     .register_recyclable(COUNTS)
///     .register(LABELS, Vec::with_capacity, Vec::clear)
///     .build();
///
/// let factory = registry.acquire();
/// let counts = factory.borrow(&COUNTS);
/// counts.lock().insert(1, 2);
/// factory.drain();
/// ```
#[derive(Clone)]
pub struct Registry {
    core: Arc<RegistryCore>,
}

struct RegistryCore {
    shapes: HashMap<&'static str, ShapeEntry, RandomState>,
    factories: Bag<Arc<FactoryCore>>,
}

struct ShapeEntry {
    object_type: &'static str,

    // Always an `Arc<Freelist<T>>` for the T the shape was registered with.
    freelist: Arc<dyn Any + Send + Sync>,
}

impl Registry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Looks up the freelist of a shape.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredShape`] if no shape with this name was registered and
    /// [`Error::ShapeTypeMismatch`] if the name was registered for a different object type.
    pub fn freelist<T>(&self, shape: &Shape<T>) -> crate::Result<&Freelist<T>>
    where
        T: Send + 'static,
    {
        let entry = self
            .core
            .shapes
            .get(shape.name())
            .ok_or(Error::UnregisteredShape { name: shape.name() })?;

        entry
            .freelist
            .downcast_ref::<Freelist<T>>()
            .ok_or_else(|| Error::ShapeTypeMismatch {
                name: shape.name(),
                registered: entry.object_type,
                requested: type_name::<T>(),
            })
    }

    /// Whether a shape with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.core.shapes.contains_key(name)
    }

    /// Names of all registered shapes, in no particular order.
    pub fn shapes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.core.shapes.keys().copied()
    }

    /// Obtains a request factory for a new request.
    ///
    /// The factory comes from the registry's own freelist of factories, so it may be an
    /// instance that served an earlier, already drained request.
    #[must_use]
    pub fn acquire(&self) -> RequestFactory {
        RequestFactory::acquire(self)
    }

    /// Number of drained request factories waiting to be reused.
    #[must_use]
    pub fn idle_factories(&self) -> usize {
        self.core.factories.len()
    }

    pub(crate) fn take_factory(&self) -> Arc<FactoryCore> {
        self.core
            .factories
            .pop()
            .unwrap_or_else(|| Arc::new(FactoryCore::new()))
    }

    pub(crate) fn return_factory(&self, factory: Arc<FactoryCore>) {
        self.core.factories.push(factory);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("shapes", &self.core.shapes.keys().collect::<Vec<_>>())
            .field("idle_factories", &self.core.factories.len())
            .finish()
    }
}

/// Builder for a [`Registry`].
///
/// Registration happens once, during startup, before any request is served. The builder is
/// consumed by [`build()`][Self::build], after which the set of shapes cannot change.
#[must_use]
pub struct RegistryBuilder {
    shapes: HashMap<&'static str, ShapeEntry, RandomState>,
}

impl RegistryBuilder {
    fn new() -> Self {
        Self {
            shapes: HashMap::default(),
        }
    }

    /// Registers a shape with explicit create and reset functions.
    ///
    /// `create` receives the shape's capacity hint and must return an object in its default
    /// state. `reset` must restore a used object to that state in place.
    ///
    /// # Panics
    ///
    /// Panics if a shape with the same name is already registered. Shape names are the
    /// identity of a freelist, so registering one twice is a programming error.
    pub fn register<T, C, R>(mut self, shape: Shape<T>, create: C, reset: R) -> Self
    where
        T: Send + 'static,
        C: Fn(usize) -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        match self.shapes.entry(shape.name()) {
            Entry::Occupied(_) => {
                panic!("shape '{}' is already registered", shape.name());
            }
            Entry::Vacant(entry) => {
                let freelist = Freelist::new(
                    shape.name(),
                    shape.capacity(),
                    Box::new(create),
                    Box::new(reset),
                );

                entry.insert(ShapeEntry {
                    object_type: type_name::<T>(),
                    freelist,
                });
            }
        }

        self
    }

    /// Registers a shape whose object type knows how to create and reset itself.
    ///
    /// # Panics
    ///
    /// Panics if a shape with the same name is already registered.
    pub fn register_recyclable<T>(self, shape: Shape<T>) -> Self
    where
        T: Recycle + Send + 'static,
    {
        self.register(shape, T::create, T::reset)
    }

    /// Freezes the registered shapes into a [`Registry`].
    pub fn build(self) -> Registry {
        Registry {
            core: Arc::new(RegistryCore {
                shapes: self.shapes,
                factories: Bag::default(),
            }),
        }
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("shapes", &self.shapes.keys().collect::<Vec<_>>())
            .finish()
    }
}
