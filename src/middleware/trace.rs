//! `middleware::trace`: one span per request.

use std::time::Instant;

use tracing::{Instrument, info, info_span};

use crate::context::{Context, Outcome};
use crate::error::Fault;
use crate::handler::BoxFuture;
use crate::pipeline::Next;
use crate::stage::{Stage, StageHandler, StageKind};

/// Opens a `request` span with method and path around the whole chain and
/// logs status, outcome and latency when it unwinds.
///
/// Faults are not logged here: they keep travelling outward and are logged
/// by whoever ends up handling them.
pub struct RequestTrace;

impl RequestTrace {
    pub const NAME: &'static str = "request-trace";

    /// As the outermost global stage.
    pub fn stage() -> Stage {
        Stage::new(Self::NAME, StageKind::Global, i32::MIN, Self)
    }
}

impl StageHandler for RequestTrace {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        let span = info_span!(
            "request",
            method = %ctx.request().method(),
            path = %ctx.request().path()
        );
        Box::pin(
            async move {
                let started = Instant::now();
                next.run(ctx).await?;

                let status = ctx.response().map(|r| r.status_code()).unwrap_or(0);
                let outcome = match ctx.outcome() {
                    Outcome::Completed      => "completed",
                    Outcome::ShortCircuited => "short-circuited",
                    Outcome::Faulted        => "faulted",
                };
                info!(status, outcome, latency_ms = started.elapsed().as_millis() as u64, "request finished");
                Ok(())
            }
            .instrument(span),
        )
    }
}
