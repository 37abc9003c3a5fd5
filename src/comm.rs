use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::RfcError;
use crate::frame::{next_uid, Invoke, InvokeRequest, InvokeResponse, RemoteError};
use crate::provider::Provider;
use crate::state::{SessionState, StateCell};

/// Outbound half supplied by the transport: hands a structured frame to the
/// channel. Serialization is the transport's concern.
///
/// Implemented for plain closures, which is convenient for tests and for
/// in-process channels.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Invoke) -> Result<(), RfcError>;
}

impl<F> FrameSink for F
where
    F: Fn(Invoke) -> Result<(), RfcError> + Send + Sync,
{
    fn send(&self, frame: Invoke) -> Result<(), RfcError> {
        self(frame)
    }
}

type Settler = oneshot::Sender<Result<Value, RfcError>>;

/// The engine multiplexing calls in both directions over one channel.
///
/// Owns the pending-call table, the provider reference, and the join gate.
/// Transports construct one communicator per session, feed inbound frames
/// through [`deliver`](Communicator::deliver), and tear it down with
/// [`shutdown`](Communicator::shutdown).
pub struct Communicator {
    provider: Mutex<Option<Arc<Provider>>>,
    pending: Mutex<HashMap<u64, Settler>>,
    state: Arc<StateCell>,
    sink: Box<dyn FrameSink>,
    released: watch::Sender<bool>,
}

impl Communicator {
    /// `sink` is the transport's outbound half and `state` the cell the
    /// transport drives through the session lifecycle. The provider may be
    /// given now or bound later, once, when the session is accepted.
    pub fn new(
        sink: impl FrameSink + 'static,
        state: Arc<StateCell>,
        provider: Option<Provider>,
    ) -> Arc<Self> {
        let (released, _) = watch::channel(false);
        Arc::new(Self {
            provider: Mutex::new(provider.map(Arc::new)),
            pending: Mutex::new(HashMap::new()),
            state,
            sink: Box::new(sink),
            released,
        })
    }

    /// The object inbound requests are resolved against, if one is bound.
    pub fn provider(&self) -> Option<Arc<Provider>> {
        self.provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_provider(&self, provider: Provider) {
        *self
            .provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(provider));
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// A proxy onto the remote peer's provider, rooted at its top scope.
    pub fn driver(self: &Arc<Self>) -> Driver {
        Driver::root(self.clone())
    }

    /// Issue an outbound call and wait for the peer to settle it.
    ///
    /// The pending entry is registered before the frame leaves, so a
    /// response can never race past its own bookkeeping. A sink that fails
    /// synchronously leaves the entry in place; it settles at teardown.
    pub async fn invoke(&self, listener: &str, parameters: Vec<Value>) -> Result<Value, RfcError> {
        self.state.inspect_outbound()?;

        let uid = next_uid();
        let (settler, settled) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid, settler);

        let request = InvokeRequest {
            uid,
            listener: listener.to_owned(),
            parameters,
        };
        debug!(uid, listener, "issuing call");
        if let Err(error) = self.sink.send(Invoke::Request(request)) {
            warn!(uid, %error, "request frame was not sent; the call settles at teardown");
        }

        match settled.await {
            Ok(result) => result,
            Err(_) => Err(RfcError::Disconnected),
        }
    }

    /// Entry point for every inbound frame, after the transport's framing
    /// and deserialization.
    ///
    /// Responses settle their pending call synchronously. Requests run as
    /// their own task so a slow provider function never holds up frames
    /// behind it.
    pub fn deliver(self: &Arc<Self>, frame: Invoke) {
        match frame {
            Invoke::Request(request) => {
                let comm = self.clone();
                tokio::spawn(async move { comm.respond(request).await });
            }
            Invoke::Response(response) => self.settle(response),
        }
    }

    async fn respond(&self, request: InvokeRequest) {
        let uid = request.uid;
        let result = match self.provider() {
            None => Err(RemoteError::new("Error", RfcError::NotReady.to_string())),
            Some(provider) => match provider.resolve(&request.listener) {
                None => Err(RemoteError::new(
                    "ReferenceError",
                    format!("unable to resolve listener \"{}\"", request.listener),
                )),
                Some(rfn) => rfn.invoke(request.parameters).await,
            },
        };

        let response = match result {
            Ok(value) => InvokeResponse::success(uid, value),
            Err(error) => {
                debug!(uid, %error, "call failed; reporting to the caller");
                InvokeResponse::failure(uid, error)
            }
        };

        // The session may have torn down while the function ran.
        if self.state.inspect_outbound().is_err() {
            debug!(uid, "discarding response for a session that is no longer open");
            return;
        }
        if let Err(error) = self.sink.send(Invoke::Response(response)) {
            warn!(uid, %error, "response frame was not sent");
        }
    }

    fn settle(&self, response: InvokeResponse) {
        let settler = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&response.uid);
        let Some(settler) = settler else {
            // Stale response racing teardown; already settled there.
            debug!(uid = response.uid, "dropping response with no pending call");
            return;
        };
        let result = if response.success {
            Ok(response.value)
        } else {
            Err(RfcError::RemoteFailure(RemoteError::from_value(
                response.value,
            )))
        };
        let _ = settler.send(result);
    }

    /// Teardown: rejects every pending call with `error` (or the generic
    /// disconnection error), marks the session closed, and releases all
    /// join waiters. Safe to call more than once; later calls find an
    /// empty table and an already-open gate.
    pub fn shutdown(&self, error: Option<RfcError>) {
        let error = error.unwrap_or(RfcError::Disconnected);
        let drained = mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if !drained.is_empty() {
            debug!(calls = drained.len(), %error, "rejecting in-flight calls on teardown");
        }
        for (_, settler) in drained {
            let _ = settler.send(Err(error.clone()));
        }
        self.state.set(SessionState::Closed);
        self.released.send_replace(true);
    }

    /// Suspend until the session is torn down. Fails with a state violation
    /// when the session was never opened; returns immediately once closed.
    pub async fn join(&self) -> Result<(), RfcError> {
        self.state.inspect_join()?;
        self.wait_released().await;
        Ok(())
    }

    /// Bounded [`join`](Communicator::join): `true` when released by
    /// teardown, `false` when the duration elapsed first.
    pub async fn join_for(&self, duration: Duration) -> Result<bool, RfcError> {
        self.state.inspect_join()?;
        Ok(tokio::time::timeout(duration, self.wait_released())
            .await
            .is_ok())
    }

    /// [`join_for`](Communicator::join_for) with an absolute deadline.
    pub async fn join_until(&self, deadline: Instant) -> Result<bool, RfcError> {
        self.state.inspect_join()?;
        Ok(tokio::time::timeout_at(deadline, self.wait_released())
            .await
            .is_ok())
    }

    async fn wait_released(&self) {
        let mut released = self.released.subscribe();
        loop {
            if *released.borrow_and_update() {
                return;
            }
            if released.changed().await.is_err() {
                return;
            }
        }
    }
}
