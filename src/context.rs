//! Per-dispatch state threaded through every stage.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Fault};
use crate::request::Request;
use crate::response::Response;
use crate::services::Scope;

// ── Items ─────────────────────────────────────────────────────────────────────

/// String-keyed values one stage leaves for a later one.
///
/// ```rust
/// use relay::Items;
///
/// let mut items = Items::default();
/// items.insert("pet_id", 42_u64);
/// assert_eq!(items.get::<u64>("pet_id"), Some(&42));
/// assert_eq!(items.get::<String>("pet_id"), None);
/// ```
#[derive(Clone, Default)]
pub struct Items(HashMap<String, Arc<dyn Any + Send + Sync>>);

impl Items {
    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.0.insert(key.into(), Arc::new(value));
    }

    /// The value under `key`, if present and of type `T`.
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.0.get(key)?.downcast_ref::<T>()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Items {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// The terminal outcome of a dispatch. Exactly one applies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The chain ran through to the terminal handler and no fault was raised.
    Completed,
    /// A stage answered without letting the inner chain run.
    ShortCircuited,
    /// A fault was raised inside the chain and then handled, whether by an
    /// exception stage or by any stage that converted it.
    Faulted,
}

// ── Context ───────────────────────────────────────────────────────────────────

/// The mutable request/response state of one dispatch.
///
/// Built by the transport from its request, handed to
/// [`Pipeline::dispatch`](crate::Pipeline::dispatch), and returned once the
/// chain has unwound.
pub struct Context {
    pub(crate) request: Request,
    response: Option<Response>,
    short_circuited: bool,
    // Set when any part of the chain returned a fault, even if it was later
    // converted into a response.
    faulted: bool,
    error: Option<Fault>,
    // Bumped on every response assignment. The exception-boundary check
    // compares it against the value seen when a fault was raised.
    pub(crate) revision: u64,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request, response: None, short_circuited: false, faulted: false, error: None, revision: 0 }
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }

    pub fn items(&self) -> &Items { &self.request.items }
    pub fn items_mut(&mut self) -> &mut Items { &mut self.request.items }

    pub fn response(&self) -> Option<&Response> { self.response.as_ref() }
    pub fn response_mut(&mut self) -> Option<&mut Response> { self.response.as_mut() }

    /// Assigns or replaces the response.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
        self.revision += 1;
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Answers with `response` and skips the rest of the inner chain.
    ///
    /// Any `next.run()` called after this, by this stage or an outer one,
    /// returns immediately. A stage that simply returns without calling
    /// `next` is treated the same way.
    pub fn short_circuit(&mut self, response: Response) {
        self.set_response(response);
        self.short_circuited = true;
    }

    pub fn is_short_circuited(&self) -> bool { self.short_circuited }

    pub(crate) fn mark_short_circuited(&mut self) {
        self.short_circuited = true;
    }

    pub(crate) fn mark_faulted(&mut self) {
        self.faulted = true;
    }

    pub fn error(&self) -> Option<&Fault> { self.error.as_ref() }

    /// Records a caught fault. Exception stages call this.
    pub fn set_error(&mut self, fault: Fault) {
        self.error = Some(fault);
    }

    pub fn outcome(&self) -> Outcome {
        if self.faulted || self.error.is_some() {
            Outcome::Faulted
        } else if self.short_circuited {
            Outcome::ShortCircuited
        } else {
            Outcome::Completed
        }
    }

    /// Resolves a capability through this dispatch's scope.
    pub fn resolve<T>(&self) -> Result<Arc<T>, Error>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.request.resolve::<T>()
    }

    pub(crate) fn scope(&self) -> &Scope { &self.request.scope }

    pub(crate) fn attach(&mut self, scope: Scope) {
        self.request.scope = scope;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("status", &self.response.as_ref().map(Response::status_code))
            .field("outcome", &self.outcome())
            .field("items", &self.request.items)
            .finish()
    }
}
