use http::Extensions;
use tokio_util::sync::CancellationToken;

/// The request-scoped context that request factories are bound to.
///
/// A context carries a typed value map ([`http::Extensions`], the same map `http::Request`
/// carries) and a lifetime token that is cancelled when the request is complete. Hosts
/// typically create one per inbound request, pass it through their before-request and
/// after-request callbacks and cancel the token once the response has been written.
///
/// Clones share the lifetime token; the value map is cloned.
///
/// # Example
///
/// ```
/// use request_pool::RequestContext;
///
/// let ctx = RequestContext::new();
/// assert!(!ctx.is_complete());
///
/// ctx.complete();
/// assert!(ctx.is_complete());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    extensions: Extensions,
    lifetime: CancellationToken,
}

impl RequestContext {
    /// Creates an empty context with a fresh lifetime token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose lifetime is governed by an existing token, for example a
    /// child of the host's connection or shutdown token.
    #[must_use]
    pub fn with_lifetime(lifetime: CancellationToken) -> Self {
        Self {
            extensions: Extensions::new(),
            lifetime,
        }
    }

    /// Creates a context from values the host already collected for the request.
    #[must_use]
    pub fn from_parts(extensions: Extensions, lifetime: CancellationToken) -> Self {
        Self {
            extensions,
            lifetime,
        }
    }

    /// Splits the context back into its value map and lifetime token.
    #[must_use]
    pub fn into_parts(self) -> (Extensions, CancellationToken) {
        (self.extensions, self.lifetime)
    }

    /// The request-scoped values.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The request-scoped values, for modification.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The token that is cancelled when the request completes.
    #[must_use]
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Signals that the request is complete. Idempotent.
    pub fn complete(&self) {
        self.lifetime.cancel();
    }

    /// Whether the request has been signalled as complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lifetime.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RequestContext: Send, Sync, Clone);

    #[test]
    fn clones_share_lifetime() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();

        clone.complete();

        assert!(ctx.is_complete());
    }

    #[test]
    fn lifetime_follows_parent_token() {
        let shutdown = CancellationToken::new();
        let ctx = RequestContext::with_lifetime(shutdown.child_token());

        shutdown.cancel();

        assert!(ctx.is_complete());
    }

    #[test]
    fn parts_round_trip_values() {
        let mut extensions = Extensions::new();
        extensions.insert(42_u32);

        let ctx = RequestContext::from_parts(extensions, CancellationToken::new());
        assert_eq!(ctx.extensions().get::<u32>(), Some(&42));

        let (extensions, lifetime) = ctx.into_parts();
        assert_eq!(extensions.get::<u32>(), Some(&42));
        assert!(!lifetime.is_cancelled());
    }
}
