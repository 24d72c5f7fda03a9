//! Terminal handlers and type erasure.
//!
//! # How async handlers are stored
//!
//! A pipeline ends in exactly one terminal [`Endpoint`]: either a single
//! handler or a [`Router`](crate::Router) holding many. Handlers of
//! different concrete types have to sit behind one interface, so each is
//! wrapped and stored as a trait object:
//!
//! ```text
//! async fn get_pet(req: Request) -> Response { … }   ← user writes this
//!        ↓ builder.handler(get_pet)
//! get_pet.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_pet))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  when the chain reaches it       ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_pet(req).await.into_reply() }) ← BoxFuture
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Fault;
use crate::request::Request;
use crate::response::{IntoReply, Response};
use crate::status::Status;

/// A heap-allocated, type-erased, `Send` future.
///
/// Stages return one from [`StageHandler::handle`](crate::StageHandler::handle);
/// the `'a` lets the future borrow the [`Context`](crate::Context).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Fault>>;
}

/// A type-erased handler shared across concurrent dispatches.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid terminal handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` with
/// the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoReply
/// ```
///
/// Returning `Result<_, E>` lets the handler raise a [`Fault`] with `?`.
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Fault>> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_reply() })
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// The innermost link of a pipeline.
///
/// `route` runs once, before the first stage, so stages can read route
/// parameters; `call` runs when the chain reaches the end.
pub trait Endpoint: Send + Sync + 'static {
    fn route(&self, _req: &mut Request) {}

    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Fault>>;
}

/// A single handler answering every request that reaches it.
pub(crate) struct Single(pub(crate) BoxedHandler);

impl Endpoint for Single {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Fault>> {
        self.0.call(req)
    }
}

/// The endpoint of a pipeline built without one: everything is `404`.
pub(crate) struct Unrouted;

impl Endpoint for Unrouted {
    fn call(&self, _req: Request) -> BoxFuture<'static, Result<Response, Fault>> {
        Box::pin(async { Ok(Response::status(Status::NotFound)) })
    }
}
