mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Log, gate, get, logging_handler, record};
use relay::middleware::exception::ExceptionBoundary;
use relay::middleware::trace::RequestTrace;
use relay::{
    Context, Error, Fault, Lifetime, Outcome, Pipeline, Registry, Request, Response, Stage,
    StageKind,
};

fn pipeline(stages: Vec<Stage>, log: &Log) -> Pipeline {
    let mut builder = Pipeline::builder();
    builder.register_all(stages).unwrap().handler(logging_handler(log));
    builder.build().unwrap()
}

async fn failing(_req: Request) -> Result<Response, Fault> {
    anyhow::bail!("connection string: secret-password")
}

#[tokio::test]
async fn same_phase_stages_nest_by_order() {
    let log = Log::default();
    let pipeline = pipeline(
        vec![
            record("3", StageKind::Action, 3, &log),
            record("1", StageKind::Action, 1, &log),
            record("2", StageKind::Action, 2, &log),
        ],
        &log,
    );

    pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(
        log.events(),
        ["before-1", "before-2", "before-3", "handler", "after-3", "after-2", "after-1"],
    );
}

#[tokio::test]
async fn two_stage_scenario_logs_last_in_first_out() {
    let log = Log::default();
    let pipeline = pipeline(
        vec![record("A", StageKind::Action, 1, &log), record("B", StageKind::Action, 2, &log)],
        &log,
    );

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(log.events(), ["before-A", "before-B", "handler", "after-B", "after-A"]);
    assert_eq!(ctx.outcome(), Outcome::Completed);
    assert_eq!(ctx.response().unwrap().body(), b"ok");
}

#[tokio::test]
async fn phases_nest_global_exception_resource_action_result() {
    let log = Log::default();
    let pipeline = pipeline(
        vec![
            record("result", StageKind::Result, -100, &log),
            record("action", StageKind::Action, -100, &log),
            record("resource", StageKind::Resource, 100, &log),
            record("exception", StageKind::Exception, 100, &log),
            record("global", StageKind::Global, 1_000, &log),
        ],
        &log,
    );

    pipeline.dispatch(get("/")).await.unwrap();

    let befores: Vec<_> = log.events().into_iter().filter(|e| e.starts_with("before-")).collect();
    assert_eq!(
        befores,
        ["before-global", "before-exception", "before-resource", "before-action", "before-result"],
    );
}

#[tokio::test]
async fn not_calling_next_skips_everything_inside() {
    let log = Log::default();
    let pipeline = pipeline(
        vec![
            record("outer", StageKind::Resource, 0, &log),
            gate("auth", StageKind::Action, 0, 401, &log),
            record("inner", StageKind::Action, 1, &log),
            record("result", StageKind::Result, 0, &log),
        ],
        &log,
    );

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(log.events(), ["before-outer", "gate-auth", "after-outer"]);
    assert!(ctx.is_short_circuited());
    assert_eq!(ctx.outcome(), Outcome::ShortCircuited);
    assert_eq!(ctx.response().unwrap().status_code(), 401);
}

#[tokio::test]
async fn explicit_short_circuit_turns_later_next_calls_into_no_ops() {
    let log = Log::default();
    let stubborn = Stage::from_fn("stubborn", StageKind::Action, 0, |ctx, next| {
        Box::pin(async move {
            ctx.short_circuit(Response::text("cached"));
            next.run(ctx).await
        })
    });
    let pipeline = pipeline(vec![stubborn, record("inner", StageKind::Action, 1, &log)], &log);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert!(log.events().is_empty());
    assert_eq!(ctx.response().unwrap().body(), b"cached");
    assert_eq!(ctx.outcome(), Outcome::ShortCircuited);
}

#[tokio::test]
async fn dropping_next_without_awaiting_it_is_a_short_circuit() {
    let log = Log::default();
    let lazy = Stage::from_fn("lazy", StageKind::Action, 0, |ctx, next| {
        Box::pin(async move {
            drop(next.run(ctx));
            Ok(())
        })
    });
    let pipeline = pipeline(vec![lazy, record("inner", StageKind::Action, 1, &log)], &log);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert!(log.events().is_empty());
    assert!(ctx.is_short_circuited());
    assert_eq!(ctx.outcome(), Outcome::ShortCircuited);
    assert!(ctx.response().is_none());
}

#[tokio::test]
async fn result_stage_post_processes_the_handler_response() {
    let log = Log::default();
    let stamp = Stage::from_fn("stamp", StageKind::Result, 0, |ctx, next| {
        Box::pin(async move {
            next.run(ctx).await?;
            if let Some(response) = ctx.response_mut() {
                response.set_header("x-stamped", "yes");
            }
            Ok(())
        })
    });
    let pipeline = pipeline(vec![stamp], &log);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();
    assert_eq!(ctx.response().unwrap().header("x-stamped"), Some("yes"));
}

#[tokio::test]
async fn reusing_a_chain_keeps_dispatches_independent() {
    struct RequestNumber(usize);

    let issued = Arc::new(AtomicUsize::new(0));
    let mut services = Registry::new();
    let counter = Arc::clone(&issued);
    services.register::<RequestNumber>(Lifetime::PerDispatch, move |_| {
        Ok(Arc::new(RequestNumber(counter.fetch_add(1, Ordering::SeqCst))))
    });

    let tag = Stage::from_fn("tag", StageKind::Action, 0, |ctx, next| {
        Box::pin(async move {
            let number = ctx.resolve::<RequestNumber>()?;
            assert!(!ctx.items().contains("number"), "items leaked from another dispatch");
            ctx.items_mut().insert("number", number.0);
            next.run(ctx).await
        })
    });

    let mut builder = Pipeline::builder();
    builder
        .register(tag)
        .unwrap()
        .handler(|req: Request| async move {
            let seen = req.items().get::<usize>("number").copied();
            let resolved = req.resolve::<RequestNumber>()?.0;
            Ok::<_, Error>(format!("{seen:?}/{resolved}"))
        })
        .services(services);
    let pipeline = builder.build().unwrap();

    let first = pipeline.dispatch(get("/")).await.unwrap();
    let second = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(first.response().unwrap().body(), b"Some(0)/0");
    assert_eq!(second.response().unwrap().body(), b"Some(1)/1");
    assert_eq!(issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exception_boundary_catches_and_hides_the_fault() {
    let log = Log::default();
    let mut builder = Pipeline::builder();
    builder
        .register(ExceptionBoundary::stage())
        .unwrap()
        .register(record("action", StageKind::Action, 0, &log))
        .unwrap()
        .handler(failing);
    let pipeline = builder.build().unwrap();

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(ctx.outcome(), Outcome::Faulted);
    assert!(ctx.error().unwrap().to_string().contains("secret-password"));
    let response = ctx.response().unwrap();
    assert_eq!(response.status_code(), 500);
    assert!(!String::from_utf8_lossy(response.body()).contains("secret"));
    // The fault unwound through the action stage without its after-half.
    assert_eq!(log.events(), ["before-action"]);
}

#[tokio::test]
async fn without_a_boundary_the_fault_leaves_dispatch() {
    let mut builder = Pipeline::builder();
    builder.handler(failing);
    let pipeline = builder.build().unwrap();

    let err = pipeline.dispatch(get("/")).await.unwrap_err();

    assert!(matches!(err, Error::Fault(_)));
    assert!(err.to_string().contains("secret-password"));
}

#[tokio::test]
async fn an_outer_stage_can_convert_a_fault_itself() {
    let log = Log::default();
    let fallback = Stage::from_fn("fallback", StageKind::Resource, 0, |ctx, next| {
        Box::pin(async move {
            if next.run(ctx).await.is_err() {
                ctx.set_response(Response::text("degraded"));
            }
            Ok(())
        })
    });
    let mut builder = Pipeline::builder();
    builder.register(fallback).unwrap().handler(failing);
    let pipeline = builder.build().unwrap();

    let ctx = pipeline.dispatch(get("/")).await.unwrap();
    assert_eq!(ctx.response().unwrap().body(), b"degraded");
    assert_eq!(ctx.outcome(), Outcome::Faulted);
    assert!(ctx.error().is_none());
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn rethrowing_boundary_is_a_pipeline_fault() {
    let rethrow = Stage::from_fn("rethrow", StageKind::Exception, 0, |ctx, next| {
        Box::pin(async move {
            next.run(ctx).await?;
            Ok(())
        })
    });
    let mut builder = Pipeline::builder();
    builder.register(rethrow).unwrap().handler(failing);
    let pipeline = builder.build().unwrap();

    let err = pipeline.dispatch(get("/")).await.unwrap_err();
    assert!(matches!(err, Error::UnhandledPipelineFault { ref stage, .. } if stage == "rethrow"));
}

#[tokio::test]
async fn silently_swallowing_boundary_is_a_pipeline_fault() {
    let swallow = Stage::from_fn("swallow", StageKind::Exception, 0, |ctx, next| {
        Box::pin(async move {
            let _ = next.run(ctx).await;
            Ok(())
        })
    });
    let mut builder = Pipeline::builder();
    builder.register(swallow).unwrap().handler(failing);
    let pipeline = builder.build().unwrap();

    let err = pipeline.dispatch(get("/")).await.unwrap_err();
    assert!(matches!(err, Error::UnhandledPipelineFault { ref stage, .. } if stage == "swallow"));
}

#[tokio::test]
async fn boundary_that_answers_with_a_response_is_accepted() {
    let answer = Stage::from_fn("answer", StageKind::Exception, 0, |ctx, next| {
        Box::pin(async move {
            if next.run(ctx).await.is_err() {
                ctx.set_response(Response::text("sorry"));
            }
            Ok(())
        })
    });
    let mut builder = Pipeline::builder();
    builder.register(answer).unwrap().handler(failing);
    let pipeline = builder.build().unwrap();

    let ctx = pipeline.dispatch(get("/")).await.unwrap();
    assert_eq!(ctx.response().unwrap().body(), b"sorry");
    assert_eq!(ctx.outcome(), Outcome::Faulted);
}

#[tokio::test]
async fn unregistered_capability_surfaces_as_itself() {
    struct Clock;

    let needs_clock = Stage::from_fn("needs-clock", StageKind::Action, 0, |ctx, next| {
        Box::pin(async move {
            ctx.resolve::<Clock>()?;
            next.run(ctx).await
        })
    });
    let mut builder = Pipeline::builder();
    builder.register(needs_clock).unwrap();
    let pipeline = builder.build().unwrap();

    let err = pipeline.dispatch(get("/")).await.unwrap_err();
    assert!(matches!(err, Error::UnregisteredCapability { capability } if capability.ends_with("Clock")));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn built_pipeline_is_shared_across_tasks() {
    let log = Log::default();
    let pipeline = pipeline(vec![record("a", StageKind::Action, 0, &log)], &log);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.dispatch(get("/")).await.map(|ctx| ctx.outcome()) })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Completed);
    }
    assert_eq!(log.events().iter().filter(|e| *e == "handler").count(), 8);
}

// ── RequestTrace ──────────────────────────────────────────────────────────────

fn traced(mut stages: Vec<Stage>, log: &Log) -> Pipeline {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    stages.push(RequestTrace::stage());
    pipeline(stages, log)
}

#[tokio::test]
async fn request_trace_is_the_outermost_global_stage() {
    let log = Log::default();
    let pipeline = traced(vec![record("early-global", StageKind::Global, -1_000, &log)], &log);

    let names: Vec<_> = pipeline.stages().iter().map(Stage::name).collect();
    assert_eq!(names, [RequestTrace::NAME, "early-global"]);
}

#[tokio::test]
async fn request_trace_leaves_the_result_untouched() {
    let log = Log::default();
    let pipeline = traced(vec![record("a", StageKind::Action, 0, &log)], &log);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(ctx.outcome(), Outcome::Completed);
    assert_eq!(ctx.response().unwrap().status_code(), 200);
    assert_eq!(ctx.response().unwrap().body(), b"ok");
    assert_eq!(log.events(), ["before-a", "handler", "after-a"]);
}

#[tokio::test]
async fn request_trace_sees_short_circuits_through() {
    let log = Log::default();
    let pipeline = traced(vec![gate("auth", StageKind::Resource, 0, 401, &log)], &log);

    let ctx = pipeline.dispatch(get("/")).await.unwrap();

    assert_eq!(ctx.outcome(), Outcome::ShortCircuited);
    assert_eq!(ctx.response().unwrap().status_code(), 401);
    assert_eq!(log.events(), ["gate-auth"]);
}

#[tokio::test]
async fn request_trace_lets_faults_pass() {
    let mut builder = Pipeline::builder();
    builder.register(RequestTrace::stage()).unwrap().handler(failing);
    let pipeline = builder.build().unwrap();

    let err = pipeline.dispatch(get("/")).await.unwrap_err();
    assert!(matches!(err, Error::Fault(_)));
    assert!(err.to_string().contains("secret-password"));
}

#[test]
fn context_starts_clean() {
    let ctx = Context::new(Request::new(relay::Method::Get, "/"));
    assert!(ctx.response().is_none());
    assert!(ctx.error().is_none());
    assert_eq!(ctx.outcome(), Outcome::Completed);
}
