//! Built-in stages.
//!
//! Each type here implements [`StageHandler`](crate::StageHandler) and comes
//! with a `stage` constructor that picks the kind it is meant to run in:
//!
//! | Stage | Kind | Job |
//! |---|---|---|
//! | [`trace::RequestTrace`] | Global | per-request span, status and latency |
//! | [`exception::ExceptionBoundary`] | Exception | turns faults into a detail-free 500 |
//! | [`auth::RequireClaim`] | Resource | 401/403 from the request principal |
//! | [`validate::EnsureExists`] | Action | 400 when a referenced entity is missing |
//! | [`validate::ValidateBody`] | Action | 400 when the JSON body is malformed or invalid |

pub mod auth;
pub mod exception;
pub mod trace;
pub mod validate;
