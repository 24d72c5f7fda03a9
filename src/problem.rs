//! Problem-details response bodies.
//!
//! Every error response relay produces itself (validation failures, auth
//! rejections, the exception boundary's 500) uses this one JSON shape:
//!
//! ```json
//! {
//!   "type": "https://tools.ietf.org/html/rfc9110#section-15.5.1",
//!   "title": "One or more validation errors occurred.",
//!   "status": 400,
//!   "errors": { "id": ["Entity not found."] }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::response::{ContentType, IntoResponse, Response};
use crate::status::Status;

const VALIDATION_TITLE: &str = "One or more validation errors occurred.";

/// A problem-details body. `errors` is only serialized when non-empty.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ProblemDetails {
    /// An empty `400` validation problem. Add messages with [`add`](Self::add).
    pub fn validation() -> Self {
        Self {
            kind: type_uri(Status::BadRequest).to_owned(),
            title: VALIDATION_TITLE.to_owned(),
            status: Status::BadRequest.code(),
            errors: BTreeMap::new(),
        }
    }

    /// A problem with no field errors, titled after the status reason.
    pub fn status(status: Status) -> Self {
        Self {
            kind: type_uri(status).to_owned(),
            title: status.reason().to_owned(),
            status: status.code(),
            errors: BTreeMap::new(),
        }
    }

    /// Appends `message` to the list for `field`. Messages keep insertion order.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors.entry(field.into()).or_default().push(message.into());
        self
    }

    /// Single-field shorthand: `ProblemDetails::field("id", "Entity not found.")`.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut problem = Self::validation();
        problem.add(field, message);
        problem
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        // Serializing a struct of strings and a string map cannot fail.
        let body = serde_json::to_vec(&self).unwrap_or_default();
        Response::builder()
            .status_code(self.status)
            .bytes(ContentType::ProblemJson, body)
    }
}

fn type_uri(status: Status) -> &'static str {
    match status {
        Status::BadRequest          => "https://tools.ietf.org/html/rfc9110#section-15.5.1",
        Status::Unauthorized        => "https://tools.ietf.org/html/rfc9110#section-15.5.2",
        Status::Forbidden           => "https://tools.ietf.org/html/rfc9110#section-15.5.4",
        Status::NotFound            => "https://tools.ietf.org/html/rfc9110#section-15.5.5",
        Status::MethodNotAllowed    => "https://tools.ietf.org/html/rfc9110#section-15.5.6",
        Status::InternalServerError => "https://tools.ietf.org/html/rfc9110#section-15.6.1",
        _                           => "about:blank",
    }
}
