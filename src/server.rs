//! HTTP host and graceful shutdown.
//!
//! The server is the transport the pipeline talks about: it turns each
//! hyper request into a [`Context`], dispatches it, and writes back whatever
//! response the chain settled on.
//!
//! # What reaches the wire
//!
//! | Dispatch result | Response |
//! |---|---|
//! | `Ok`, response set | that response |
//! | `Ok`, no response | `500`, nothing produced one |
//! | `Err(_)` | `500` problem body; the error is logged, never rendered |
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **SIGINT** the server stops accepting, lets every
//! in-flight connection finish, then returns from [`Server::serve`].

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::Error;
use crate::method::Method;
use crate::pipeline::Pipeline;
use crate::problem::ProblemDetails;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::status::Status;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use relay::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), relay::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        Ok(Self { addr: addr.parse()? })
    }

    /// Starts accepting connections and dispatching them through `pipeline`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, stages = pipeline.stages().len(), "relay listening");

        // Every spawned connection task lives in the JoinSet so shutdown can
        // wait for all of them.
        let mut tasks = tokio::task::JoinSet::new();

        // `select!` polls the shutdown future on every turn of the loop, so it
        // has to stay put in memory after its first poll. `tokio::pin!` pins
        // it on the stack.
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` polls the arms top to bottom instead of at random.
                // Shutdown comes first so a SIGTERM stops accepting even if
                // more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    // Cloning a Pipeline clones one Arc; the chain is shared.
                    let pipeline = pipeline.clone();
                    // TokioIo adapts tokio's AsyncRead/AsyncWrite to hyper's IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // `service_fn` turns the closure into a hyper `Service`.
                        // It is called once per request on the connection,
                        // not once per connection.
                        let svc = service_fn(move |req| {
                            let pipeline = pipeline.clone();
                            async move { Ok::<_, std::convert::Infallible>(handle(pipeline, req).await) }
                        });

                        // `auto::Builder` serves HTTP/1.1 or HTTP/2, whichever
                        // the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on a long-running server.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection before returning.
        while tasks.join_next().await.is_some() {}

        info!("relay stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

/// One request in, one response out. Never fails: every error becomes a status.
async fn handle(
    pipeline: Pipeline,
    req: hyper::Request<hyper::body::Incoming>,
) -> http::Response<Full<Bytes>> {
    let request = match into_request(req).await {
        Ok(request) => request,
        Err(response) => return response.into_http(),
    };
    respond(pipeline.dispatch(Context::new(request)).await).into_http()
}

async fn into_request(req: hyper::Request<hyper::body::Incoming>) -> Result<Request, Response> {
    let (parts, body) = req.into_parts();

    let Ok(method) = Method::try_from(&parts.method) else {
        warn!(method = %parts.method, "unsupported method");
        return Err(Response::status(Status::MethodNotAllowed));
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return Err(Response::status(Status::BadRequest));
        }
    };

    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut request = Request::new(method, target).with_body(body);
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(value) => request = request.with_header(name.as_str(), value),
            Err(_) => warn!(header = %name, "skipping non-ascii header"),
        }
    }
    Ok(request)
}

/// Maps a dispatch result to what the client sees.
fn respond(result: Result<Context, Error>) -> Response {
    match result {
        Ok(mut ctx) => ctx.take_response().unwrap_or_else(|| {
            error!(outcome = ?ctx.outcome(), "dispatch produced no response");
            internal_error()
        }),
        // Already logged by the dispatcher.
        Err(_) => internal_error(),
    }
}

fn internal_error() -> Response {
    ProblemDetails::status(Status::InternalServerError).into_response()
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C.
///
/// If a handler cannot be installed that arm never resolves, and the error
/// is logged.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
