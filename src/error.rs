use thiserror::Error;

use crate::frame::RemoteError;
use crate::state::SessionState;

/// Every failure a caller of this crate can observe.
///
/// The enum is `Clone` because teardown fans a single error out to all
/// pending calls at once.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RfcError {
    /// The operation is illegal in the session's current lifecycle state,
    /// e.g. closing before opening or accepting twice.
    #[error("cannot {operation} while the session is {state}")]
    StateViolation {
        operation: &'static str,
        state: SessionState,
    },

    /// An inbound request arrived before a provider was assigned.
    #[error("Provider is not specified yet.")]
    NotReady,

    /// Teardown with no explicit cause.
    #[error("connection has been closed")]
    Disconnected,

    /// The channel itself failed; supplied by the transport to teardown.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The remote side reported a failed call; the payload is whatever it
    /// supplied.
    #[error("{0}")]
    RemoteFailure(RemoteError),

    /// The remote peer answered the connection handshake with a rejection.
    #[error("connection request was rejected by the remote peer")]
    Rejected,

    /// A parameter or return value could not cross the serialization
    /// boundary.
    #[error("payload codec error: {0}")]
    Codec(String),
}
