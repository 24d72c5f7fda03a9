//! Unified error type.

use std::net::AddrParseError;

use crate::stage::StageKind;

/// A runtime failure raised by a stage or a terminal handler.
///
/// Faults travel outward through the chain as `Err` values. Raise one with
/// `?` on any error type or with [`anyhow::bail!`].
pub type Fault = anyhow::Error;

/// The error type returned by relay's fallible operations.
///
/// Validation failures are never `Error`s: they are ordinary short-circuit
/// [`Response`](crate::Response) values. This type covers configuration
/// mistakes, broken fault boundaries, faults nothing caught, and transport
/// failures (binding to a port, accepting a connection).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address: {0}")]
    Addr(#[from] AddrParseError),

    #[error("a {kind} stage named `{name}` is already registered")]
    DuplicateStageName { kind: StageKind, name: String },

    #[error("pipeline has no stages and no terminal handler")]
    EmptyPipeline,

    #[error("no registration for capability `{capability}`")]
    UnregisteredCapability { capability: &'static str },

    #[error("exception stage `{stage}` broke the fault boundary: {detail}")]
    UnhandledPipelineFault { stage: String, detail: String },

    /// A fault that left the chain with no exception stage to catch it.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl Error {
    /// Recovers the most specific variant from a fault that crossed the chain.
    ///
    /// Stages raise `Error`s through `?` (an unregistered capability, say);
    /// those come back as themselves rather than wrapped in [`Error::Fault`].
    pub(crate) fn from_fault(fault: Fault) -> Self {
        match fault.downcast::<Error>() {
            Ok(error) => error,
            Err(fault) => Error::Fault(fault),
        }
    }

    /// `true` for the configuration-time variants that are fatal at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateStageName { .. }
                | Error::EmptyPipeline
                | Error::UnregisteredCapability { .. }
        )
    }
}
