//! Stages: the interceptors a pipeline is built from.
//!
//! A stage is a name, a [`StageKind`] picking its phase, an `order` inside
//! that phase, and a handler. The handler does its "before" work, calls
//! [`Next::run`], and does its "after" work on whatever the inner chain left
//! in the [`Context`]:
//!
//! ```rust
//! use relay::{Fault, Stage, StageKind};
//!
//! let stamp = Stage::from_fn("stamp", StageKind::Result, 0, |ctx, next| {
//!     Box::pin(async move {
//!         next.run(ctx).await?;
//!         if let Some(response) = ctx.response_mut() {
//!             response.set_header("x-served-by", "relay");
//!         }
//!         Ok::<(), Fault>(())
//!     })
//! });
//! assert_eq!(stamp.name(), "stamp");
//! ```
//!
//! Not calling `next` at all is a short-circuit.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Fault;
use crate::handler::BoxFuture;
use crate::pipeline::Next;

/// Which phase of the pipeline a stage belongs to.
///
/// Phases nest outermost first: `Global`, `Exception`, `Resource`, `Action`,
/// `Result`, then the terminal handler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StageKind {
    Global,
    Resource,
    Action,
    Result,
    Exception,
}

impl StageKind {
    /// Nesting depth of the phase; lower wraps higher.
    pub(crate) fn phase(self) -> u8 {
        match self {
            Self::Global    => 0,
            Self::Exception => 1,
            Self::Resource  => 2,
            Self::Action    => 3,
            Self::Result    => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global    => "global",
            Self::Resource  => "resource",
            Self::Action    => "action",
            Self::Result    => "result",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The behaviour of a stage.
///
/// Implement it on a struct when the stage has configuration; use
/// [`Stage::from_fn`] for one-off closures.
pub trait StageHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>>;
}

struct FnStage<F>(F);

impl<F> StageHandler for FnStage<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Fault>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        (self.0)(ctx, next)
    }
}

/// One registered interceptor. Immutable once built.
#[derive(Clone)]
pub struct Stage {
    name: String,
    kind: StageKind,
    order: i32,
    pub(crate) handler: Arc<dyn StageHandler>,
}

impl Stage {
    pub fn new(name: impl Into<String>, kind: StageKind, order: i32, handler: impl StageHandler) -> Self {
        Self { name: name.into(), kind, order, handler: Arc::new(handler) }
    }

    /// A stage from a closure returning a boxed future.
    ///
    /// The bound is spelled out here, not via [`StageHandler`], so the
    /// compiler can infer the closure's higher-ranked signature.
    pub fn from_fn<F>(name: impl Into<String>, kind: StageKind, order: i32, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Fault>> + Send + Sync + 'static,
    {
        Self::new(name, kind, order, FnStage(f))
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> StageKind { self.kind }
    pub fn order(&self) -> i32 { self.order }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
