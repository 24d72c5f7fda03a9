//! `middleware::auth`: claim checks against the request principal.
//!
//! relay does not authenticate. Something outside the chain, or an earlier
//! stage, puts a [`Principal`] into the items under [`Principal::ITEM`];
//! [`RequireClaim`] only inspects it.

use tracing::warn;

use crate::context::Context;
use crate::error::Fault;
use crate::handler::BoxFuture;
use crate::pipeline::Next;
use crate::problem::ProblemDetails;
use crate::response::IntoResponse;
use crate::stage::{Stage, StageHandler, StageKind};
use crate::status::Status;

/// Who is making the request.
#[derive(Clone, Debug, Default)]
pub struct Principal {
    authenticated: bool,
    claims: Vec<(String, String)>,
}

impl Principal {
    pub const ITEM: &'static str = "principal";

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated() -> Self {
        Self { authenticated: true, claims: Vec::new() }
    }

    pub fn with_claim(mut self, kind: &str, value: &str) -> Self {
        self.claims.push((kind.to_owned(), value.to_owned()));
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn has_claim(&self, kind: &str, value: &str) -> bool {
        self.claims.iter().any(|(k, v)| k == kind && v == value)
    }
}

/// Requires an authenticated principal holding one claim.
///
/// No principal, or an anonymous one, short-circuits with `401`. An
/// authenticated principal without the claim short-circuits with `403`.
pub struct RequireClaim {
    kind: String,
    value: String,
}

impl RequireClaim {
    pub fn new(kind: &str, value: &str) -> Self {
        Self { kind: kind.to_owned(), value: value.to_owned() }
    }

    /// As a resource stage named `require-claim:{kind}={value}`.
    pub fn stage(kind: &str, value: &str, order: i32) -> Stage {
        Stage::new(format!("require-claim:{kind}={value}"), StageKind::Resource, order, Self::new(kind, value))
    }
}

impl StageHandler for RequireClaim {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let denied = match ctx.items().get::<Principal>(Principal::ITEM) {
                Some(p) if p.has_claim(&self.kind, &self.value) && p.is_authenticated() => None,
                Some(p) if p.is_authenticated() => Some(Status::Forbidden),
                _ => Some(Status::Unauthorized),
            };

            match denied {
                None => next.run(ctx).await,
                Some(status) => {
                    warn!(claim = %self.kind, value = %self.value, status = status.code(), "request denied");
                    ctx.short_circuit(ProblemDetails::status(status).into_response());
                    Ok(())
                }
            }
        })
    }
}
