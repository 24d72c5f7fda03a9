//! Minimal relay example: a pet store behind the built-in stages.
//!
//! Run with:
//!   RUST_LOG=info,relay=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/pets/1
//!   curl http://localhost:3000/pets/42                      # 400, entity not found
//!   curl -X POST http://localhost:3000/pets \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"rex"}'
//!   curl -X POST http://localhost:3000/pets -d '{"name":""}'  # 400, field error
//!   curl -X DELETE http://localhost:3000/pets/1              # 401
//!   curl -X DELETE http://localhost:3000/pets/1 -H 'x-role: admin'

use std::sync::Arc;

use relay::middleware::auth::{Principal, RequireClaim};
use relay::middleware::exception::ExceptionBoundary;
use relay::middleware::trace::RequestTrace;
use relay::middleware::validate::{EnsureExists, Validate, ValidateBody};
use relay::{
    BoxFuture, Context, Entity, Error, Fault, Lifetime, MemoryRepository, Method, Next, Pipeline,
    ProblemDetails, Registry, Repository, Request, Response, Router, Server, Stage, StageHandler,
    StageKind, Status,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Pet {
    #[serde(default)]
    id: u64,
    name: String,
}

impl Entity for Pet {
    fn id(&self) -> u64 { self.id }
    fn set_id(&mut self, id: u64) { self.id = id; }
}

impl Validate for Pet {
    fn validate(&self, problem: &mut ProblemDetails) {
        if self.name.trim().is_empty() {
            problem.add("name", "The name field is required.");
        }
    }
}

type Pets = MemoryRepository<Pet>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let mut services = Registry::new();
    services.register::<Pets>(Lifetime::PerProcess, |_| {
        Ok(Arc::new(Pets::seeded([Pet { id: 1, name: "rex".into() }])))
    });

    let app = Router::new()
        .get("/pets",         list_pets)
        .get("/pets/{id}",    get_pet)
        .post("/pets",        create_pet)
        .delete("/pets/{id}", delete_pet);

    let mut builder = Pipeline::builder();
    builder
        .register(RequestTrace::stage())?
        .register(ExceptionBoundary::stage())?
        .register(Stage::from_fn("principal", StageKind::Resource, 0, |ctx, next| {
            Box::pin(async move {
                let principal = match ctx.request().header("x-role").map(str::to_owned) {
                    Some(role) => Principal::authenticated().with_claim("role", &role),
                    None => Principal::anonymous(),
                };
                ctx.items_mut().insert(Principal::ITEM, principal);
                next.run(ctx).await
            })
        }))?
        .register(When::stage("admin-for-delete", StageKind::Resource, 10, is_delete, RequireClaim::new("role", "admin")))?
        .register(When::stage("pet-exists", StageKind::Action, 0, has_id, EnsureExists::<Pets>::param("id")))?
        .register(When::stage("pet-body", StageKind::Action, 1, is_post, ValidateBody::<Pet>::new("pet")))?
        .router(app)
        .services(services);

    Server::bind("0.0.0.0:3000")?.serve(builder.build()?).await
}

/// Runs `inner` only for requests matching `applies`; others pass straight through.
struct When<S> {
    applies: fn(&Request) -> bool,
    inner: S,
}

impl<S: StageHandler> When<S> {
    fn stage(name: &str, kind: StageKind, order: i32, applies: fn(&Request) -> bool, inner: S) -> Stage {
        Stage::new(name, kind, order, Self { applies, inner })
    }
}

impl<S: StageHandler> StageHandler for When<S> {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        if (self.applies)(ctx.request()) {
            self.inner.handle(ctx, next)
        } else {
            next.run(ctx)
        }
    }
}

fn is_delete(req: &Request) -> bool { req.method() == Method::Delete }
fn is_post(req: &Request) -> bool { req.method() == Method::Post }
fn has_id(req: &Request) -> bool { req.param("id").is_some() }

// GET /pets
async fn list_pets(req: Request) -> Result<Response, Fault> {
    let pets = req.resolve::<Pets>()?.all();
    Ok(Response::json(serde_json::to_vec(&pets)?))
}

// GET /pets/{id}: pet-exists already checked the id.
async fn get_pet(req: Request) -> Result<Response, Fault> {
    let id = req.items().get::<u64>("id").copied().unwrap_or_default();
    match req.resolve::<Pets>()?.get(id) {
        Some(pet) => Ok(Response::json(serde_json::to_vec(&pet)?)),
        None => Ok(Response::status(Status::NotFound)),
    }
}

// POST /pets: pet-body left the validated pet in the items.
async fn create_pet(req: Request) -> Result<Response, Fault> {
    let Some(pet) = req.items().get::<Pet>("pet").cloned() else {
        return Ok(Response::status(Status::BadRequest));
    };
    let stored = req.resolve::<Pets>()?.add(pet);
    Ok(Response::builder()
        .status(Status::Created)
        .header("location", &format!("/pets/{}", stored.id))
        .json(serde_json::to_vec(&stored)?))
}

// DELETE /pets/{id} → 204 No Content
async fn delete_pet(req: Request) -> Result<Response, Fault> {
    let id = req.items().get::<u64>("id").copied().unwrap_or_default();
    req.resolve::<Pets>()?.delete(id);
    Ok(Response::status(Status::NoContent))
}
