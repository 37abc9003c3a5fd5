//! Bidirectional remote function calls multiplexed over a message channel.
//!
//! Two peers each expose a [`Provider`] (a tree of callable functions) and
//! hold a [`Driver`] onto the other side's provider. Calls made through the
//! driver travel as request frames, complete out of order, and settle the
//! caller's future when the matching response frame arrives. The
//! [`Communicator`] in the middle owns the pending-call table and the
//! join/teardown lifecycle; the bundled TCP [`Server`]/[`Connector`] pair
//! shows the transport contract any other channel can implement.

mod comm;
mod driver;
mod error;
mod frame;
mod macros;
mod net;
mod provider;
mod state;

pub use futures::future::BoxFuture;

pub use comm::{Communicator, FrameSink};
pub use driver::Driver;
pub use error::RfcError;
pub use frame::{IntoParameters, Invoke, InvokeRequest, InvokeResponse, RemoteError};
pub use net::{client::Connector, server::Acceptor, server::Server};
pub use provider::Provider;
pub use state::{SessionState, StateCell};

/// A single function callable by the remote peer.
///
/// `Domain` is the tuple of positional parameters the function accepts;
/// `Range` is its return type. Both cross the wire as opaque JSON values.
/// A function fails by returning a [`RemoteError`], which reaches the remote
/// caller with its `name`, `message`, and data fields intact.
pub trait RemoteFunction {
    /// The positional parameter tuple, decoded from the request frame.
    type Domain: serde::de::DeserializeOwned + Send;

    /// The return type, encoded into the response frame.
    type Range: serde::Serialize;

    /// The name this function is registered under inside a [`Provider`].
    fn name(&self) -> &str;

    /// The body of the function.
    fn call<'a>(&'a self, args: Self::Domain) -> BoxFuture<'a, Result<Self::Range, RemoteError>>;
}
