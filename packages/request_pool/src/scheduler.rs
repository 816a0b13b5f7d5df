use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::binding::factory;
use crate::metrics::CEILING_EXPIRED;
use crate::{RequestContext, RequestFactory};

/// How long a release task waits for its request to complete before giving up.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(20);

/// What a release task does when the ceiling expires before the request completes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum TimeoutPolicy {
    /// Log and leave the request's objects where they are. They stay unavailable to other
    /// requests until someone calls [`manual_drain()`][crate::manual_drain] for the context.
    /// This is the default.
    #[default]
    Abandon,

    /// Log and drain anyway.
    ///
    /// Only safe if nothing can still be using the request's objects after the ceiling,
    /// since their leases expire and the objects go to other requests.
    ///
    /// The drain runs on the runtime's blocking thread pool, as it waits for every
    /// [`LeaseGuard`][crate::LeaseGuard] the handler still holds.
    DrainAnyway,
}

/// The result of one release task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReleaseOutcome {
    /// The request completed within the ceiling and was drained.
    Drained,

    /// The request completed within the ceiling but had already been drained by someone
    /// else, e.g. via [`manual_drain()`][crate::manual_drain].
    AlreadyDrained,

    /// The ceiling expired first and the request was left undrained.
    Abandoned,

    /// The ceiling expired first and the request was drained according to
    /// [`TimeoutPolicy::DrainAnyway`].
    DrainedAfterCeiling,

    /// The context had no bound request factory, so there was nothing to release.
    Unbound,
}

/// Configuration of a [`ReleaseScheduler`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use request_pool::{ReleaseConfig, TimeoutPolicy};
///
/// let config = ReleaseConfig::builder()
///     .ceiling(Duration::from_secs(5))
///     .on_timeout(TimeoutPolicy::DrainAnyway)
///     .build();
///
/// assert_eq!(config.ceiling(), Duration::from_secs(5));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReleaseConfig {
    ceiling: Duration,
    on_timeout: TimeoutPolicy,
}

impl ReleaseConfig {
    /// Starts building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ReleaseConfigBuilder {
        ReleaseConfigBuilder {
            config: Self::default(),
        }
    }

    /// The longest a release task waits for its request to complete.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// What happens when the ceiling expires first.
    #[must_use]
    pub fn on_timeout(&self) -> TimeoutPolicy {
        self.on_timeout
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
            on_timeout: TimeoutPolicy::default(),
        }
    }
}

/// Builder for [`ReleaseConfig`].
#[derive(Debug)]
#[must_use]
pub struct ReleaseConfigBuilder {
    config: ReleaseConfig,
}

impl ReleaseConfigBuilder {
    /// Sets the ceiling. Default is [`DEFAULT_CEILING`].
    ///
    /// # Panics
    ///
    /// Panics if the ceiling is zero.
    pub fn ceiling(mut self, ceiling: Duration) -> Self {
        assert!(!ceiling.is_zero(), "release ceiling must be non-zero");
        self.config.ceiling = ceiling;
        self
    }

    /// Sets the policy applied when the ceiling expires. Default is
    /// [`TimeoutPolicy::Abandon`].
    pub fn on_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.config.on_timeout = policy;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ReleaseConfig {
        self.config
    }
}

/// Releases a request's borrowed objects once the request completes.
///
/// At request end, [`schedule()`][Self::schedule] spawns a background task that waits for the
/// context's lifetime token to be cancelled, bounded by the configured ceiling. The caller is
/// never blocked.
///
/// If the token is cancelled first, the bound factory is drained. If the ceiling expires
/// first, a warning is logged and the [`TimeoutPolicy`] decides whether to drain anyway.
///
/// Release tasks run on a tokio runtime: the one given to
/// [`with_runtime()`][Self::with_runtime], or else the runtime of the calling thread.
///
/// # Example
///
/// ```
/// use request_pool::{Registry, ReleaseOutcome, ReleaseScheduler, RequestContext, Shape};
///
/// const BUF: Shape<Vec<u8>> = Shape::new("buf").with_capacity(512);
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = Registry::builder().register_recyclable(BUF).build();
/// let scheduler = ReleaseScheduler::new();
///
/// let ctx = request_pool::acquire(&registry, RequestContext::new());
/// request_pool::borrow(&ctx, &BUF).lock().extend_from_slice(b"response");
///
/// let release = scheduler.schedule(&ctx);
///
/// // The host signals completion after the response has been written.
/// ctx.complete();
///
/// assert_eq!(release.await.unwrap(), ReleaseOutcome::Drained);
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReleaseScheduler {
    config: ReleaseConfig,
    runtime: Option<Handle>,
}

impl ReleaseScheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler with a custom configuration.
    #[must_use]
    pub fn with_config(config: ReleaseConfig) -> Self {
        Self {
            config,
            runtime: None,
        }
    }

    /// Spawns release tasks on the given runtime instead of the caller's runtime.
    ///
    /// Use this when the host invokes its after-request callbacks from threads that are not
    /// part of a tokio runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Spawns the release task for the request the context belongs to.
    ///
    /// The returned handle reports what the task did. Hosts usually drop it.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was configured and the caller is not inside a tokio runtime.
    pub fn schedule(&self, ctx: &RequestContext) -> JoinHandle<ReleaseOutcome> {
        let task = release(
            factory(ctx).cloned(),
            ctx.lifetime().clone(),
            self.config,
        );

        match &self.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        }
    }

    /// After-request callback: schedules the release and returns the context unchanged.
    ///
    /// The payload and the handler result do not influence the release.
    ///
    /// Unlike [`schedule()`][Self::schedule], this never panics. If no runtime was configured
    /// and the caller is not inside a tokio runtime, a warning is logged and nothing is
    /// scheduled; the request can still be released with
    /// [`manual_drain()`][crate::manual_drain].
    #[must_use]
    pub fn after_request<P, E>(
        &self,
        ctx: RequestContext,
        _payload: &P,
        _error: Option<&E>,
    ) -> RequestContext
    where
        P: ?Sized,
        E: ?Sized,
    {
        let Some(runtime) = self.runtime() else {
            warn!(
                "after-request callback ran outside a tokio runtime; \
                 the request must be drained manually"
            );
            return ctx;
        };

        // Fire and forget: the outcome is logged by the task itself.
        drop(runtime.spawn(release(
            factory(&ctx).cloned(),
            ctx.lifetime().clone(),
            self.config,
        )));
        ctx
    }
}

async fn release(
    factory: Option<RequestFactory>,
    lifetime: CancellationToken,
    config: ReleaseConfig,
) -> ReleaseOutcome {
    let Some(factory) = factory else {
        warn!("request context has no bound request factory; nothing to release");
        return ReleaseOutcome::Unbound;
    };

    tokio::select! {
        // Completion wins a tie with the ceiling.
        biased;

        () = lifetime.cancelled() => {
            if factory.drain() {
                ReleaseOutcome::Drained
            } else {
                debug!("request completed but was already drained");
                ReleaseOutcome::AlreadyDrained
            }
        }
        () = tokio::time::sleep(config.ceiling) => {
            CEILING_EXPIRED.with(|e| e.observe_once());

            match config.on_timeout {
                TimeoutPolicy::Abandon => {
                    warn!(
                        ceiling = ?config.ceiling,
                        pending = factory.len(),
                        "request did not complete within the release ceiling; \
                         its objects stay borrowed until drained manually"
                    );
                    ReleaseOutcome::Abandoned
                }
                TimeoutPolicy::DrainAnyway => {
                    warn!(
                        ceiling = ?config.ceiling,
                        pending = factory.len(),
                        "request did not complete within the release ceiling; draining anyway"
                    );

                    // The handler may still hold lease guards, which the drain waits for.
                    let drained = tokio::task::spawn_blocking(move || factory.drain())
                        .await
                        .unwrap_or_else(|join_error| {
                            error!(%join_error, "draining after the release ceiling failed");
                            false
                        });

                    if drained {
                        ReleaseOutcome::DrainedAfterCeiling
                    } else {
                        ReleaseOutcome::AlreadyDrained
                    }
                }
            }
        }
    }
}
