//! `middleware::exception`: the fault boundary.

use tracing::error;

use crate::context::Context;
use crate::error::Fault;
use crate::handler::BoxFuture;
use crate::pipeline::Next;
use crate::problem::ProblemDetails;
use crate::response::IntoResponse;
use crate::stage::{Stage, StageHandler, StageKind};
use crate::status::Status;

/// Catches every fault raised inside it.
///
/// The fault is logged with its full cause chain and recorded in
/// [`Context::error`]; the client gets a `500` problem body that says
/// nothing about it.
pub struct ExceptionBoundary;

impl ExceptionBoundary {
    pub const NAME: &'static str = "exception-boundary";

    pub fn stage() -> Stage {
        Stage::new(Self::NAME, StageKind::Exception, 0, Self)
    }
}

impl StageHandler for ExceptionBoundary {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            if let Err(fault) = next.run(ctx).await {
                error!(
                    method = %ctx.request().method(),
                    path = %ctx.request().path(),
                    "unhandled fault: {fault:#}"
                );
                ctx.set_response(ProblemDetails::status(Status::InternalServerError).into_response());
                ctx.set_error(fault);
            }
            Ok(())
        })
    }
}
