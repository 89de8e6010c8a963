//! Handler trait and type erasure.
//!
//! The router stores handlers of different concrete types side by side, so
//! every handler is erased into one trait object:
//!
//! ```text
//! async fn probe(req: Request) -> Response { … }   ← user writes this
//!        ↓ Api::route(Method::GET, "/healthz", probe)
//! probe.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(probe))                       ← BoxedHandler
//!        ↓
//! handler.call(req)  at request time               ← one vtable dispatch
//! ```
//!
//! Resource routes go through the same path: the dispatch engine registers a
//! closure per operation that owns an `Arc` of the shared engine state.
//!
//! Per request this costs one `Arc` clone of the route's handler and one
//! virtual call. The future it returns is boxed once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// Pinned because the runtime polls it in place. `Send + 'static` so a
/// connection task can carry it across worker threads.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
///
/// The router clones the `Arc` out of its table on lookup, so a running
/// handler holds no borrow of the router.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Automatically satisfied for any function or closure with the shape
/// `Fn(Request) -> impl Future<Output = impl IntoResponse>`. Sealed: only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// Private, so no crate outside this one can name it or implement
/// [`Handler`] by hand.
mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

/// Any `Fn(Request) -> Fut`: named `async fn` items, closures returning an
/// `async` block, and the dispatch engine's per-route closures.
impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        // Build the concrete future now; converting its output to a
        // `Response` happens inside the box so every handler returns one type.
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
