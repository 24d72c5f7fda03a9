//! # relay
//!
//! An ordered interceptor pipeline for request/response processing, with
//! lifetime-scoped services and a minimal HTTP host.
//!
//! ## The contract
//!
//! A pipeline is a fixed chain of [`Stage`]s around one terminal handler.
//! Each stage does some work, calls [`Next::run`] to let the rest of the
//! chain execute, then does more work on the result. Three rules make the
//! chain predictable:
//!
//! - **Ordering.** Stages nest by [`StageKind`] (Global, Exception,
//!   Resource, Action, Result), then by `order`, then by registration.
//!   First in, last out.
//! - **Short-circuit.** A stage that answers without calling `next` skips
//!   everything inside it. Outer stages still finish.
//! - **Fault boundary.** Faults are `Err` values unwinding through the
//!   same frames. An Exception stage must catch and record them; without
//!   one they leave [`Pipeline::dispatch`] as errors.
//!
//! Collaborators come from a [`Registry`] keyed by capability type with a
//! [`Lifetime`] each, resolved per dispatch through a [`Scope`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use relay::middleware::{exception::ExceptionBoundary, trace::RequestTrace, validate::EnsureExists};
//! use relay::{Lifetime, MemoryRepository, Pipeline, Registry, Request, Response, Router, Server};
//! # #[derive(Clone)] struct Pet { id: u64 }
//! # impl relay::Entity for Pet { fn id(&self) -> u64 { self.id } fn set_id(&mut self, id: u64) { self.id = id } }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relay::Error> {
//!     let mut services = Registry::new();
//!     services.register::<MemoryRepository<Pet>>(Lifetime::PerProcess, |_| {
//!         Ok(Arc::new(MemoryRepository::new()))
//!     });
//!
//!     let mut builder = Pipeline::builder();
//!     builder
//!         .register(RequestTrace::stage())?
//!         .register(ExceptionBoundary::stage())?
//!         .register(EnsureExists::<MemoryRepository<Pet>>::param("id").stage("pet-exists", 0))?
//!         .router(Router::new().get("/pets/{id}", get_pet))
//!         .services(services);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(builder.build()?).await
//! }
//!
//! async fn get_pet(req: Request) -> Response {
//!     let id = req.items().get::<u64>("id").copied().unwrap_or_default();
//!     Response::json(format!(r#"{{"id":{id}}}"#).into_bytes())
//! }
//! ```

mod context;
mod error;
mod handler;
mod method;
mod pipeline;
mod problem;
mod repository;
mod request;
mod response;
mod router;
mod server;
mod services;
mod stage;
mod status;

pub mod middleware;

pub use context::{Context, Items, Outcome};
pub use error::{Error, Fault};
pub use handler::{BoxFuture, Endpoint, Handler};
pub use method::Method;
pub use pipeline::{Next, Pipeline, PipelineBuilder};
pub use problem::ProblemDetails;
pub use repository::{Entity, Lookup, MemoryRepository, Repository};
pub use request::Request;
pub use response::{ContentType, IntoReply, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use services::{Lifetime, Registry, Scope};
pub use stage::{Stage, StageHandler, StageKind};
pub use status::Status;
