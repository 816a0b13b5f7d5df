//! Wiring into a host request-processing framework.
//!
//! The host is modelled by [`HookHost`]: anything that can run a callback before and after
//! each request. [`install()`] registers request factory binding as the before-request
//! callback and the release scheduler as the after-request callback.

use std::any::Any;
use std::error::Error as StdError;

use crate::{Registry, ReleaseScheduler, RequestContext, acquire};

/// Error type a before-request callback may fail with.
pub type HookError = Box<dyn StdError + Send + Sync>;

/// Callback invoked with the inbound context before the request handler runs.
pub type BeforeRequest =
    Box<dyn Fn(RequestContext) -> Result<RequestContext, HookError> + Send + Sync>;

/// Callback invoked with the context, the request payload and the handler's error (if any)
/// after the request handler has run.
pub type AfterRequest = Box<
    dyn Fn(
            RequestContext,
            &(dyn Any + Send + Sync),
            Option<&(dyn StdError + Send + Sync)>,
        ) -> RequestContext
        + Send
        + Sync,
>;

/// A request-processing framework that accepts lifecycle callbacks.
///
/// Implement this for the host framework's hook registry.
pub trait HookHost {
    /// Adds a callback to run before each request handled by the named component.
    fn add_before_request(&mut self, component: &'static str, hook: BeforeRequest);

    /// Adds a callback to run after each request handled by the named component.
    fn add_after_request(&mut self, component: &'static str, hook: AfterRequest);
}

/// Registers request-scoped pooling with the host for the named component.
///
/// Before each request, a request factory is acquired from the registry and bound to the
/// context. After each request, a release task is scheduled that drains the factory once the
/// context's lifetime token is cancelled.
///
/// # Example
///
/// ```
/// use request_pool::{
///     AfterRequest, BeforeRequest, HookHost, Registry, ReleaseScheduler, RequestContext,
/// };
///
/// #[derive(Default)]
/// struct Server {
///     before: Vec<BeforeRequest>,
///     after: Vec<AfterRequest>,
/// }
///
/// impl HookHost for Server {
///     fn add_before_request(&mut self, _component: &'static str, hook: BeforeRequest) {
///         self.before.push(hook);
///     }
///
///     fn add_after_request(&mut self, _component: &'static str, hook: AfterRequest) {
///         self.after.push(hook);
///     }
/// }
///
/// let mut server = Server::default();
/// request_pool::install(
///     &mut server,
///     "server",
///     &Registry::builder().build(),
///     &ReleaseScheduler::new(),
/// );
///
/// let ctx = (server.before[0])(RequestContext::new()).unwrap();
/// assert!(request_pool::factory(&ctx).is_some());
/// ```
pub fn install<H>(
    host: &mut H,
    component: &'static str,
    registry: &Registry,
    scheduler: &ReleaseScheduler,
) where
    H: HookHost + ?Sized,
{
    let registry = registry.clone();
    host.add_before_request(
        component,
        Box::new(move |ctx| Ok(acquire(&registry, ctx))),
    );

    let scheduler = scheduler.clone();
    host.add_after_request(
        component,
        Box::new(move |ctx, payload, error| scheduler.after_request(ctx, payload, error)),
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{Shape, borrow, factory};

    const COUNTER: Shape<u64> = Shape::new("counter");

    #[derive(Default)]
    struct FakeHost {
        before: Vec<(&'static str, BeforeRequest)>,
        after: Vec<(&'static str, AfterRequest)>,
    }

    impl HookHost for FakeHost {
        fn add_before_request(&mut self, component: &'static str, hook: BeforeRequest) {
            self.before.push((component, hook));
        }

        fn add_after_request(&mut self, component: &'static str, hook: AfterRequest) {
            self.after.push((component, hook));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_bind_and_release() {
        let registry = Registry::builder()
            .register(COUNTER, |_| 0, |value| *value = 0)
            .build();

        let mut host = FakeHost::default();
        install(&mut host, "server", &registry, &ReleaseScheduler::new());

        assert_eq!(host.before.len(), 1);
        assert_eq!(host.after.len(), 1);
        assert_eq!(host.before[0].0, "server");

        let ctx = (host.before[0].1)(RequestContext::new()).unwrap();
        assert!(factory(&ctx).is_some());

        let lease = borrow(&ctx, &COUNTER);
        *lease.lock() = 9;

        let payload = "request body";
        let ctx = (host.after[0].1)(ctx, &payload, None);

        ctx.complete();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!lease.is_live());
        assert_eq!(registry.freelist(&COUNTER).unwrap().len(), 1);
    }
}
