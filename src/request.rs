//! Incoming request type.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::Items;
use crate::error::Error;
use crate::method::Method;
use crate::services::Scope;

/// An incoming request.
///
/// Besides the transport data (method, path, query, headers, body) a request
/// carries the per-dispatch [`Items`] and service [`Scope`], so terminal
/// handlers can read what stages left for them and resolve capabilities.
/// Cloning is cheap: the body is reference-counted and item values are `Arc`s.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) items: Items,
    pub(crate) scope: Scope,
}

impl Request {
    /// Builds a request for `target`, a path with an optional `?query`.
    ///
    /// ```rust
    /// use relay::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/pets?id=42");
    /// assert_eq!(req.path(), "/pets");
    /// assert_eq!(req.query("id").as_deref(), Some("42"));
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_owned(),
            query,
            headers: Vec::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            items: Items::default(),
            scope: Scope::detached(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn items(&self) -> &Items { &self.items }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/pets/{id}`, `req.param("id")` on `/pets/42` returns `Some("42")`.
    /// Parameters are bound by the router before the first stage runs.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the first percent-decoded query value for `key`.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query.as_deref()?
            .split('&')
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(k) == key).then(|| decode(v))
            })
            .next()
    }

    /// Resolves a capability through the dispatch's service scope.
    pub fn resolve<T>(&self) -> Result<Arc<T>, Error>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.scope.resolve::<T>()
    }
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
