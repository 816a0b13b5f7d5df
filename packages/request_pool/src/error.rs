use thiserror::Error;

/// Errors reported by the fallible (`try_*`) variants of the request pool API.
///
/// Every variant describes a usage error rather than a runtime fault. The panicking variants
/// of the same operations (e.g. [`RequestFactory::borrow()`][crate::RequestFactory::borrow])
/// turn these into panics carrying the same message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No shape with the given name was registered when the registry was built.
    #[error("shape '{name}' is not registered")]
    UnregisteredShape {
        /// Name of the shape that was requested.
        name: &'static str,
    },

    /// A shape with the given name exists but holds objects of a different type.
    #[error("shape '{name}' holds objects of type {registered}, not {requested}")]
    ShapeTypeMismatch {
        /// Name of the shape that was requested.
        name: &'static str,

        /// Object type the shape was registered with.
        registered: &'static str,

        /// Object type the caller asked for.
        requested: &'static str,
    },

    /// The request context has no request factory bound to it.
    ///
    /// Every code path that borrows through a context must have gone through
    /// [`acquire()`][crate::acquire] first.
    #[error("the request context has no bound request factory")]
    Unbound,

    /// The request this handle belongs to has already been drained.
    #[error("the request has already been drained")]
    Drained,

    /// The lease refers to an object that was returned to its freelist when its request was
    /// drained. The object may already be in use by another request.
    #[error("the lease expired when its request was drained")]
    Expired,
}

/// A specialized `Result` type for request pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
