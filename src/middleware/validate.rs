//! `middleware::validate`: stages that answer `400` before the handler runs.
//!
//! Both stages report failures as a validation [`ProblemDetails`] and
//! short-circuit; neither raises a fault for bad input. On success they
//! leave the validated value in the items for later stages and the handler.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::context::Context;
use crate::error::Fault;
use crate::handler::BoxFuture;
use crate::pipeline::Next;
use crate::problem::ProblemDetails;
use crate::repository::Lookup;
use crate::response::IntoResponse;
use crate::stage::{Stage, StageHandler, StageKind};

pub const NOT_FOUND: &str = "Entity not found.";

// ── EnsureExists ──────────────────────────────────────────────────────────────

/// Where [`EnsureExists`] reads the id from.
#[derive(Clone, Debug)]
pub enum IdSource {
    /// An item left by an earlier stage, as `u64` or `String`.
    Item(String),
    /// A route parameter bound by the router.
    Param(String),
    /// A query-string value.
    Query(String),
}

/// Rejects the request unless the referenced entity exists.
///
/// The lookup capability `C` is resolved from the dispatch scope, so the
/// store behind it is whatever the registry says. Errors from the lookup
/// itself are faults, not validation failures.
pub struct EnsureExists<C: ?Sized> {
    field: String,
    source: IdSource,
    lookup: PhantomData<fn() -> Arc<C>>,
}

impl<C: Lookup + ?Sized> EnsureExists<C> {
    /// Checks `field`, read from `source`. Errors are reported under `field`.
    pub fn new(field: &str, source: IdSource) -> Self {
        Self { field: field.to_owned(), source, lookup: PhantomData }
    }

    /// Checks the route parameter `field`.
    pub fn param(field: &str) -> Self {
        Self::new(field, IdSource::Param(field.to_owned()))
    }

    pub fn stage(self, name: &str, order: i32) -> Stage {
        Stage::new(name, StageKind::Action, order, self)
    }

    fn read_id(&self, ctx: &Context) -> Result<u64, String> {
        let raw = match &self.source {
            IdSource::Item(key) => {
                if let Some(id) = ctx.items().get::<u64>(key) {
                    return Ok(*id);
                }
                ctx.items().get::<String>(key).cloned()
            }
            IdSource::Param(key) => ctx.request().param(key).map(str::to_owned),
            IdSource::Query(key) => ctx.request().query(key),
        };
        let field = &self.field;
        match raw {
            None => Err(format!("The {field} field is required.")),
            Some(raw) => raw.trim().parse()
                .map_err(|_| format!("The value '{raw}' is not valid for {field}.")),
        }
    }
}

impl<C: Lookup + ?Sized> StageHandler for EnsureExists<C> {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let id = match self.read_id(ctx) {
                Ok(id) => id,
                Err(message) => {
                    ctx.short_circuit(ProblemDetails::field(&self.field, message).into_response());
                    return Ok(());
                }
            };

            let lookup = ctx.resolve::<C>()?;
            if !lookup.exists(id).await? {
                debug!(field = %self.field, id, "referenced entity does not exist");
                ctx.short_circuit(ProblemDetails::field(&self.field, NOT_FOUND).into_response());
                return Ok(());
            }

            ctx.items_mut().insert(self.field.clone(), id);
            next.run(ctx).await
        })
    }
}

// ── ValidateBody ──────────────────────────────────────────────────────────────

/// Field-level checks on a deserialized body.
pub trait Validate {
    /// Adds a message per problem found; leave `problem` untouched if valid.
    fn validate(&self, problem: &mut ProblemDetails);
}

/// Deserializes the JSON body into `T` and runs [`Validate::validate`].
///
/// Malformed JSON is reported under `body`; validation messages under the
/// fields `T` names. A valid `T` is stored in the items under the
/// configured key.
pub struct ValidateBody<T> {
    item: String,
    body: PhantomData<fn() -> T>,
}

impl<T> ValidateBody<T>
where
    T: DeserializeOwned + Validate + Send + Sync + 'static,
{
    pub const FIELD: &'static str = "body";

    /// Stores the validated body under `item`.
    pub fn new(item: &str) -> Self {
        Self { item: item.to_owned(), body: PhantomData }
    }

    pub fn stage(self, name: &str, order: i32) -> Stage {
        Stage::new(name, StageKind::Action, order, self)
    }

    fn parse(body: &[u8]) -> Result<T, ProblemDetails> {
        if body.is_empty() {
            return Err(ProblemDetails::field(Self::FIELD, "A non-empty request body is required."));
        }
        let value: T = serde_json::from_slice(body)
            .map_err(|e| ProblemDetails::field(Self::FIELD, e.to_string()))?;

        let mut problem = ProblemDetails::validation();
        value.validate(&mut problem);
        if problem.has_errors() { Err(problem) } else { Ok(value) }
    }
}

impl<T> StageHandler for ValidateBody<T>
where
    T: DeserializeOwned + Validate + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            match Self::parse(ctx.request().body()) {
                Ok(value) => {
                    ctx.items_mut().insert(self.item.clone(), value);
                    next.run(ctx).await
                }
                Err(problem) => {
                    debug!(fields = ?problem.errors.keys().collect::<Vec<_>>(), "request body rejected");
                    ctx.short_circuit(problem.into_response());
                    Ok(())
                }
            }
        })
    }
}
