#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Request-scoped object reuse.
//!
//! Services that handle many short requests tend to allocate the same scratch objects over and
//! over: header maps, byte buffers, per-request lookup tables. This crate lets request handlers
//! borrow such objects from shared freelists instead. Every borrow is recorded against the
//! request, and when the request completes all of its borrowed objects are reset and returned
//! to their freelists in one step.
//!
//! # Quick start
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use request_pool::{Registry, RequestContext, Shape};
//!
//! const HEADERS: Shape<HashMap<String, String>> = Shape::new("headers").with_capacity(16);
//! const BODY: Shape<Vec<u8>> = Shape::new("body").with_capacity(4096);
//!
//! let registry = Registry::builder()
//!     .register_recyclable(HEADERS)
//!     .register_recyclable(BODY)
//!     .build();
//!
//! // When the request starts.
//! let ctx = request_pool::acquire(&registry, RequestContext::new());
//!
//! // Anywhere in the request handler.
//! let headers = request_pool::borrow(&ctx, &HEADERS);
//! headers.lock().insert("content-type".to_string(), "text/plain".to_string());
//!
//! // When the request is done.
//! request_pool::manual_drain(&ctx);
//!
//! assert!(!headers.is_live());
//! assert_eq!(registry.freelist(&HEADERS).unwrap().len(), 1);
//! ```
//!
//! # Key concepts
//!
//! - **Shapes**: a [`Shape`] names a kind of pooled object and the capacity hint it is created
//!   with. Shapes are registered once in a [`Registry`], each with its own [`Freelist`].
//! - **Request factories**: a [`RequestFactory`] hands out [`Lease`]s for one request and
//!   remembers them. Draining it resets and recycles everything in borrow order. A factory can
//!   be drained at most once per request; later drains are no-ops.
//! - **Context binding**: [`acquire()`] binds a factory to a [`RequestContext`] so handler code
//!   only needs the context to borrow.
//! - **Release scheduling**: a [`ReleaseScheduler`] spawns a task per request that drains the
//!   factory when the context's lifetime token is cancelled, or gives up after a ceiling.
//!   [`manual_drain()`] is the escape hatch for work that outlives the request callbacks.
//! - **Host integration**: [`install()`] registers the binding and the release scheduling as
//!   before-request and after-request callbacks of any [`HookHost`].
//!
//! # Leases
//!
//! A [`Lease`] stays valid only until its request is drained. Once the object has been recycled
//! the lease expires: [`Lease::lock()`] panics and [`Lease::try_lock()`] returns
//! [`Error::Expired`], so a value can never be observed by two requests at once.
//!
//! # Observability
//!
//! The crate logs through `tracing` and publishes `nm` metrics for borrows, drains, objects per
//! drain, ceiling expirations and panicking reset functions.

mod binding;
mod context;
mod error;
mod factory;
mod freelist;
mod hooks;
mod lease;
mod metrics;
mod recycle;
mod registry;
mod scheduler;
mod shape;

pub use binding::*;
pub use context::*;
pub use error::*;
pub(crate) use factory::FactoryCore;
pub use factory::{DrainGuard, RequestFactory};
pub use freelist::{Freelist, FreelistStats};
pub(crate) use freelist::{Reclaim, Slot, SlotState};
pub use hooks::*;
pub use lease::*;
pub use recycle::*;
pub use registry::*;
pub use scheduler::*;
pub use shape::*;
