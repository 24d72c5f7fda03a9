use std::sync::Arc;

use parking_lot::Mutex;
use relay::{BoxFuture, Context, Entity, Fault, Method, Next, Request, Response, Stage, StageHandler, StageKind};
use serde::{Deserialize, Serialize};

/// Shared event log the recording stages and handlers append to.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Log {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().iter().any(|e| e == event)
    }
}

/// Logs `before-{label}` / `after-{label}` around `next`.
#[allow(dead_code)]
pub struct Record {
    label: String,
    log: Log,
}

impl StageHandler for Record {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            self.log.push(format!("before-{}", self.label));
            next.run(ctx).await?;
            self.log.push(format!("after-{}", self.label));
            Ok(())
        })
    }
}

#[allow(dead_code)]
pub fn record(label: &str, kind: StageKind, order: i32, log: &Log) -> Stage {
    Stage::new(label, kind, order, Record { label: label.to_owned(), log: log.clone() })
}

/// Answers `status` without calling `next`, logging `gate-{label}`.
#[allow(dead_code)]
pub struct Gate {
    label: String,
    status: u16,
    log: Log,
}

impl StageHandler for Gate {
    fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            self.log.push(format!("gate-{}", self.label));
            ctx.set_response(Response::builder().status_code(self.status).no_body());
            Ok(())
        })
    }
}

#[allow(dead_code)]
pub fn gate(label: &str, kind: StageKind, order: i32, status: u16, log: &Log) -> Stage {
    Stage::new(label, kind, order, Gate { label: label.to_owned(), status, log: log.clone() })
}

/// A terminal handler that logs `handler` and answers `200 ok`.
#[allow(dead_code)]
pub fn logging_handler(
    log: &Log,
) -> impl Fn(Request) -> std::future::Ready<Response> + Send + Sync + 'static {
    let log = log.clone();
    move |_req: Request| {
        log.push("handler");
        std::future::ready(Response::text("ok"))
    }
}

pub fn get(target: &str) -> Context {
    Context::new(Request::new(Method::Get, target))
}

#[allow(dead_code)]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Pet {
    #[serde(default)]
    pub id: u64,
    pub name: String,
}

#[allow(dead_code)]
impl Pet {
    pub fn named(name: &str) -> Self {
        Self { id: 0, name: name.to_owned() }
    }
}

impl Entity for Pet {
    fn id(&self) -> u64 { self.id }
    fn set_id(&mut self, id: u64) { self.id = id; }
}

#[allow(dead_code)]
pub fn body_json(ctx: &Context) -> serde_json::Value {
    let response = ctx.response().expect("dispatch produced a response");
    serde_json::from_slice(response.body()).expect("response body is JSON")
}
