mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Pet, get};
use relay::{
    Context, Error, Lifetime, MemoryRepository, Method, Pipeline, Registry, Repository, Request,
    Response, Router, Scope, Stage, StageKind,
};

type Pets = MemoryRepository<Pet>;

/// Pet store with create and list routes over a PerProcess repository.
fn store() -> (Pipeline, Arc<Pets>) {
    let pets = Arc::new(Pets::new());
    let mut services = Registry::new();
    services.instance(Arc::clone(&pets));

    let router = Router::new()
        .post("/pets", |req: Request| async move {
            let pet: Pet = serde_json::from_slice(req.body())?;
            let stored = req.resolve::<Pets>()?.add(pet);
            Ok::<_, anyhow::Error>(Response::json(serde_json::to_vec(&stored)?))
        })
        .get("/pets", |req: Request| async move {
            let all = req.resolve::<Pets>()?.all();
            Ok::<_, anyhow::Error>(Response::json(serde_json::to_vec(&all)?))
        });

    let mut builder = Pipeline::builder();
    builder.router(router).services(services);
    (builder.build().unwrap(), pets)
}

fn create(name: &str) -> Context {
    let body = serde_json::to_vec(&Pet::named(name)).unwrap();
    Context::new(Request::new(Method::Post, "/pets").with_body(body))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_to_a_shared_repository_get_unique_ids() {
    const ADDS: usize = 64;
    let (pipeline, pets) = store();

    let handles: Vec<_> = (0..ADDS)
        .map(|n| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let ctx = pipeline.dispatch(create(&format!("pet-{n}"))).await.unwrap();
                let stored: Pet = serde_json::from_slice(ctx.response().unwrap().body()).unwrap();
                stored.id
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()), "duplicate id handed out");
    }

    assert_eq!(pets.len(), ADDS);
    assert_eq!(ids, (1..=ADDS as u64).collect::<HashSet<_>>());

    let listed = pipeline.dispatch(get("/pets")).await.unwrap();
    let all: Vec<Pet> = serde_json::from_slice(listed.response().unwrap().body()).unwrap();
    assert_eq!(all.len(), ADDS);
}

#[tokio::test]
async fn malformed_create_is_a_fault_not_a_row() {
    let (pipeline, pets) = store();
    let ctx = Context::new(Request::new(Method::Post, "/pets").with_body("nope"));

    let err = pipeline.dispatch(ctx).await.unwrap_err();

    assert!(matches!(err, Error::Fault(_)));
    assert!(pets.is_empty());
}

/// Hands out a fresh number per construction.
struct Ticket(usize);

fn ticketing(lifetime: Lifetime) -> (Registry, Arc<AtomicUsize>) {
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&issued);
    let mut services = Registry::new();
    services.register::<Ticket>(lifetime, move |_| {
        Ok(Arc::new(Ticket(counter.fetch_add(1, Ordering::SeqCst))))
    });
    (services, issued)
}

/// Resolves a ticket in a stage and again in the handler, answering `"{stage}/{handler}"`.
fn ticket_pipeline(services: Registry) -> Pipeline {
    let stage = Stage::from_fn("ticket", StageKind::Action, 0, |ctx, next| {
        Box::pin(async move {
            let ticket = ctx.resolve::<Ticket>()?;
            ctx.items_mut().insert("ticket", ticket.0);
            next.run(ctx).await
        })
    });

    let mut builder = Pipeline::builder();
    builder
        .register(stage)
        .unwrap()
        .handler(|req: Request| async move {
            let from_stage = req.items().get::<usize>("ticket").copied().unwrap_or(usize::MAX);
            let from_handler = req.resolve::<Ticket>()?.0;
            Ok::<_, Error>(format!("{from_stage}/{from_handler}"))
        })
        .services(services);
    builder.build().unwrap()
}

#[tokio::test]
async fn per_dispatch_is_shared_by_stage_and_handler() {
    let (services, issued) = ticketing(Lifetime::PerDispatch);
    let pipeline = ticket_pipeline(services);

    let first = pipeline.dispatch(get("/")).await.unwrap();
    let second = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(first.response().unwrap().body(), b"0/0");
    assert_eq!(second.response().unwrap().body(), b"1/1");
    assert_eq!(issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn per_resolution_is_fresh_every_time() {
    let (services, issued) = ticketing(Lifetime::PerResolution);
    let pipeline = ticket_pipeline(services);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(ctx.response().unwrap().body(), b"0/1");
    assert_eq!(issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn per_process_is_built_once_for_all_dispatches() {
    let (services, issued) = ticketing(Lifetime::PerProcess);
    let pipeline = ticket_pipeline(services);

    for _ in 0..3 {
        let ctx = pipeline.dispatch(get("/")).await.unwrap();
        assert_eq!(ctx.response().unwrap().body(), b"0/0");
    }
    assert_eq!(issued.load(Ordering::SeqCst), 1);
}

// ── Factories with dependencies ───────────────────────────────────────────────

trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct Prefix(String);

struct Polite {
    prefix: Arc<Prefix>,
}

impl Greeter for Polite {
    fn greet(&self, name: &str) -> String {
        format!("{} {name}", self.prefix.0)
    }
}

#[tokio::test]
async fn trait_object_capabilities_resolve_their_own_dependencies() {
    let mut services = Registry::new();
    services
        .instance(Arc::new(Prefix("Hello,".into())))
        .register::<dyn Greeter>(Lifetime::PerDispatch, |scope: &Scope| {
            Ok(Arc::new(Polite { prefix: scope.resolve::<Prefix>()? }) as Arc<dyn Greeter>)
        });

    let mut builder = Pipeline::builder();
    builder
        .router(Router::new().get("/greet/{name}", |req: Request| async move {
            let greeter = req.resolve::<dyn Greeter>()?;
            Ok::<_, Error>(greeter.greet(req.param("name").unwrap_or("stranger")))
        }))
        .services(services);
    let pipeline = builder.build().unwrap();

    let ctx = pipeline.dispatch(get("/greet/ada")).await.unwrap();
    assert_eq!(ctx.response().unwrap().body(), b"Hello, ada");
}

#[tokio::test]
async fn later_registration_wins() {
    let mut services = Registry::new();
    services
        .instance(Arc::new(Prefix("first".into())))
        .instance(Arc::new(Prefix("second".into())));
    assert_eq!(services.len(), 1);

    let mut builder = Pipeline::builder();
    builder
        .handler(|req: Request| async move { Ok::<_, Error>(req.resolve::<Prefix>()?.0.clone()) })
        .services(services);
    let pipeline = builder.build().unwrap();

    let ctx = pipeline.dispatch(get("/")).await.unwrap();
    assert_eq!(ctx.response().unwrap().body(), b"second");
}
