//! Pipeline construction and dispatch.
//!
//! # Shape of a built pipeline
//!
//! Stages are nested by phase, then by `order`, outermost first:
//!
//! ```text
//! Global(order…) → Exception(order…) → Resource(order…) → Action(order…) → Result(order…) → endpoint
//! ```
//!
//! Each stage sees a [`Next`] bound to everything inside it. For stages A
//! (order 1) and B (order 2) in one phase the trace is always
//! `before-A, before-B, handler, after-B, after-A`.
//!
//! # Faults
//!
//! A fault is an `Err` travelling outward through the same call frames.
//! Every enclosing stage sees it as the result of its `next.run(ctx)` and
//! may convert it. An [`StageKind::Exception`] stage is the designated
//! boundary: it must record the fault ([`Context::set_error`]) or answer
//! with a response, and must return `Ok`. Anything else is reported as
//! [`Error::UnhandledPipelineFault`]. Without a boundary the fault comes
//! out of [`Pipeline::dispatch`] as an `Err`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::context::Context;
use crate::error::{Error, Fault};
use crate::handler::{BoxFuture, Endpoint, Handler, Single, Unrouted};
use crate::router::Router;
use crate::services::Registry;
use crate::stage::{Stage, StageKind};

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects stages, the terminal endpoint, and the registration table.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
    endpoint: Option<Arc<dyn Endpoint>>,
    registry: Option<Registry>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages)
            .field("endpoint", &self.endpoint.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl PipelineBuilder {
    /// Adds a stage. Names are unique per [`StageKind`].
    pub fn register(&mut self, stage: Stage) -> Result<&mut Self, Error> {
        let duplicate = self.stages.iter()
            .any(|s| s.kind() == stage.kind() && s.name() == stage.name());
        if duplicate {
            return Err(Error::DuplicateStageName { kind: stage.kind(), name: stage.name().to_owned() });
        }
        debug!(stage = stage.name(), kind = %stage.kind(), order = stage.order(), "stage registered");
        self.stages.push(stage);
        Ok(self)
    }

    /// Registers a configuration list of stages, in order.
    pub fn register_all(&mut self, stages: impl IntoIterator<Item = Stage>) -> Result<&mut Self, Error> {
        for stage in stages {
            self.register(stage)?;
        }
        Ok(self)
    }

    /// Ends the chain in a single handler.
    pub fn handler(&mut self, handler: impl Handler) -> &mut Self {
        self.endpoint = Some(Arc::new(Single(handler.into_boxed_handler())));
        self
    }

    /// Ends the chain in a router.
    pub fn router(&mut self, router: Router) -> &mut Self {
        self.endpoint = Some(Arc::new(router));
        self
    }

    /// Ends the chain in any [`Endpoint`].
    pub fn endpoint(&mut self, endpoint: impl Endpoint) -> &mut Self {
        self.endpoint = Some(Arc::new(endpoint));
        self
    }

    /// The registration table stages and handlers resolve capabilities from.
    pub fn services(&mut self, registry: Registry) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Orders the stages and freezes the chain.
    pub fn build(self) -> Result<Pipeline, Error> {
        let Self { mut stages, endpoint, registry } = self;
        if stages.is_empty() && endpoint.is_none() {
            return Err(Error::EmptyPipeline);
        }

        // Stable: equal (phase, order) keeps registration order.
        stages.sort_by_key(|s| (s.kind().phase(), s.order()));

        debug!(
            stages = ?stages.iter().map(Stage::name).collect::<Vec<_>>(),
            "pipeline built"
        );

        Ok(Pipeline {
            inner: Arc::new(Chain {
                stages: stages.into(),
                endpoint: endpoint.unwrap_or_else(|| Arc::new(Unrouted)),
                registry: Arc::new(registry.unwrap_or_default()),
            }),
        })
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Chain {
    stages: Arc<[Stage]>,
    endpoint: Arc<dyn Endpoint>,
    registry: Arc<Registry>,
}

/// A built, immutable chain. Clones share it.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Chain>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Stages in execution order, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.inner.stages
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Runs one request through the chain.
    ///
    /// Opens a fresh service scope for the dispatch and closes it (dropping
    /// PerDispatch instances) before returning. `Ok` carries the final
    /// context: read [`Context::outcome`], the response, and the recorded
    /// error from it. `Err` means a fault crossed every stage, or an
    /// exception stage broke the boundary contract.
    pub async fn dispatch(&self, mut ctx: Context) -> Result<Context, Error> {
        let chain = &*self.inner;
        ctx.attach(chain.registry.scope());
        chain.endpoint.route(&mut ctx.request);

        let mut root = Probe::default();
        let next = Next { rest: &chain.stages, endpoint: &*chain.endpoint, probe: &mut root };
        let result = next.run(&mut ctx).await;

        ctx.scope().close();
        match result {
            Ok(()) => Ok(ctx),
            Err(fault) => {
                let error = Error::from_fault(fault);
                error!(
                    method = %ctx.request.method,
                    path = %ctx.request.path,
                    "dispatch failed: {error}"
                );
                Err(error)
            }
        }
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// What a stage saw of its `next`: whether it was called, and whether the
/// inner chain faulted (and at which response revision).
#[derive(Default)]
struct Probe {
    entered: bool,
    raised_at: Option<u64>,
}

/// The continuation handed to a stage: the rest of the chain.
///
/// Consumed by [`run`](Next::run), so the inner chain executes at most once
/// per stage invocation.
pub struct Next<'a> {
    rest: &'a [Stage],
    endpoint: &'a dyn Endpoint,
    probe: &'a mut Probe,
}

impl<'a> Next<'a> {
    /// Runs every stage inside this one, then the endpoint.
    ///
    /// Returns immediately if the context is already short-circuited.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<(), Fault>>
    where
        'a: 'b,
    {
        let Next { rest, endpoint, probe } = self;
        Box::pin(async move {
            // Only a polled continuation counts as entered.
            probe.entered = true;
            if ctx.is_short_circuited() {
                return Ok(());
            }
            let result = match rest.split_first() {
                Some((stage, rest)) => invoke(stage, ctx, rest, endpoint).await,
                None => terminal(endpoint, ctx).await,
            };
            if result.is_err() {
                probe.raised_at = Some(ctx.revision);
                ctx.mark_faulted();
            }
            result
        })
    }
}

async fn terminal(endpoint: &dyn Endpoint, ctx: &mut Context) -> Result<(), Fault> {
    trace!("terminal handler");
    let response = endpoint.call(ctx.request.clone()).await?;
    ctx.set_response(response);
    Ok(())
}

fn invoke<'a>(
    stage: &'a Stage,
    ctx: &'a mut Context,
    rest: &'a [Stage],
    endpoint: &'a dyn Endpoint,
) -> BoxFuture<'a, Result<(), Fault>> {
    Box::pin(async move {
        trace!(stage = stage.name(), kind = %stage.kind(), "enter");
        let mut probe = Probe::default();
        let result = stage.handler
            .handle(ctx, Next { rest, endpoint, probe: &mut probe })
            .await;
        trace!(stage = stage.name(), ok = result.is_ok(), "exit");

        if stage.kind() == StageKind::Exception {
            return boundary(stage, ctx, &probe, result);
        }
        if result.is_ok() && !probe.entered && !ctx.is_short_circuited() {
            debug!(stage = stage.name(), "short-circuited without calling next");
            ctx.mark_short_circuited();
        }
        result
    })
}

/// Enforces the exception-stage contract on the stage's own result.
fn boundary(stage: &Stage, ctx: &mut Context, probe: &Probe, result: Result<(), Fault>) -> Result<(), Fault> {
    let violation = |detail: String| -> Fault {
        Error::UnhandledPipelineFault { stage: stage.name().to_owned(), detail }.into()
    };

    match result {
        Err(fault) => {
            error!(stage = stage.name(), "exception stage rethrew: {fault:#}");
            Err(violation(format!("rethrew `{fault}`")))
        }
        Ok(()) => match probe.raised_at {
            Some(at) if ctx.error().is_none() && ctx.revision == at => {
                error!(stage = stage.name(), "exception stage swallowed a fault without recording it");
                Err(violation("returned without recording the fault or setting a response".to_owned()))
            }
            _ => {
                if !probe.entered && !ctx.is_short_circuited() {
                    ctx.mark_short_circuited();
                }
                Ok(())
            }
        },
    }
}
