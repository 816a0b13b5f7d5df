//! Binding request factories to request contexts.

use tracing::{debug, warn};

use crate::{Error, Lease, Registry, RequestContext, RequestFactory, Shape};

/// The private extension key a context's request factory is stored under.
#[derive(Clone)]
struct Bound(RequestFactory);

/// Acquires a request factory from the registry and binds it to the context.
///
/// Call this when a request starts, before any handler code borrows through the context.
/// If the context was already bound, the earlier factory is replaced; objects it holds are
/// not recycled unless someone still holding it drains it.
///
/// # Example
///
/// ```
/// use request_pool::{Registry, RequestContext, Shape};
///
/// const LINES: Shape<Vec<String>> = Shape::new("lines").with_capacity(32);
///
/// let registry = Registry::builder().register_recyclable(LINES).build();
///
/// let ctx = request_pool::acquire(&registry, RequestContext::new());
/// let lines = request_pool::borrow(&ctx, &LINES);
/// lines.lock().push("hello".to_string());
///
/// request_pool::manual_drain(&ctx);
/// assert!(!lines.is_live());
/// ```
#[must_use]
pub fn acquire(registry: &Registry, mut ctx: RequestContext) -> RequestContext {
    let factory = registry.acquire();

    if let Some(Bound(previous)) = ctx.extensions_mut().insert(Bound(factory)) {
        warn!(
            pending = previous.len(),
            "request context was already bound to a request factory; replacing it"
        );
    }

    ctx
}

/// Returns the request factory bound to the context, if any.
#[must_use]
pub fn factory(ctx: &RequestContext) -> Option<&RequestFactory> {
    ctx.extensions().get::<Bound>().map(|bound| &bound.0)
}

/// Borrows an object of the given shape through the factory bound to the context.
///
/// # Panics
///
/// Panics if the context has no bound factory (it did not pass through [`acquire()`]), if
/// the shape is not registered or if the request has already been drained.
#[must_use]
pub fn borrow<T>(ctx: &RequestContext, shape: &Shape<T>) -> Lease<T>
where
    T: Send + 'static,
{
    try_borrow(ctx, shape)
        .unwrap_or_else(|error| panic!("cannot borrow from request pool: {error}"))
}

/// Borrows an object of the given shape through the factory bound to the context, reporting
/// usage errors instead of panicking.
///
/// # Errors
///
/// [`Error::Unbound`] if the context has no bound factory, otherwise any error of
/// [`RequestFactory::try_borrow()`].
pub fn try_borrow<T>(ctx: &RequestContext, shape: &Shape<T>) -> crate::Result<Lease<T>>
where
    T: Send + 'static,
{
    factory(ctx).ok_or(Error::Unbound)?.try_borrow(shape)
}

/// Synchronously drains the factory bound to the context.
///
/// This is the escape hatch for work that outlives the request callbacks, e.g. asynchronous
/// processing that continues after the response, or a release task that gave up at the
/// ceiling. Returns `false` if the request had already been drained.
///
/// # Panics
///
/// Panics if the context has no bound factory.
pub fn manual_drain(ctx: &RequestContext) -> bool {
    let factory =
        factory(ctx).unwrap_or_else(|| panic!("cannot drain request pool: {}", Error::Unbound));

    debug!("draining request factory manually");
    factory.drain()
}
