//! Radix-tree request router.
//!
//! One tree per method, O(path-length) lookup. A router is a terminal
//! [`Endpoint`]: it binds `{param}` segments before the stage chain starts
//! and calls the matched handler when the chain reaches it.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::error::Fault;
use crate::handler::{BoxFuture, BoxedHandler, Endpoint, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// The application router.
///
/// Build it once at startup and hand it to
/// [`PipelineBuilder::router`](crate::PipelineBuilder::router).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// ```rust
    /// # use relay::{Method, Request, Response, Router};
    /// # async fn get_pet(_: Request) -> Response { Response::text("") }
    /// # async fn add_pet(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Get,  "/pets/{id}", get_pet)
    ///     .on(Method::Post, "/pets",      add_pet);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, path, handler)
    }

    fn lookup(&self, method: Method, path: &str) -> Option<(&BoxedHandler, HashMap<String, String>)> {
        let matched = self.routes.get(&method)?.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value, params))
    }

    /// Methods with a route matching `path`, for the `allow` header of a 405.
    fn allowed(&self, path: &str) -> Vec<Method> {
        Method::ALL.into_iter()
            .filter(|m| self.routes.get(m).is_some_and(|tree| tree.at(path).is_ok()))
            .collect()
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Endpoint for Router {
    fn route(&self, req: &mut Request) {
        if let Some((_, params)) = self.lookup(req.method, &req.path) {
            req.params = params;
        }
    }

    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Fault>> {
        if let Some((handler, _)) = self.lookup(req.method, &req.path) {
            return handler.call(req);
        }

        let allowed = self.allowed(&req.path);
        let response = if allowed.is_empty() {
            Response::status(Status::NotFound)
        } else {
            let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
            Response::builder()
                .status(Status::MethodNotAllowed)
                .header("allow", &allow)
                .no_body()
        };
        Box::pin(async move { Ok(response) })
    }
}
