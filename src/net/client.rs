use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use crate::comm::Communicator;
use crate::driver::Driver;
use crate::error::RfcError;
use crate::net::{
    close_session, decode_line, spawn_reader, spawn_writer, Control, Handshake, Outbound,
    QueueSink, WireMessage, WireStream,
};
use crate::provider::Provider;
use crate::state::{SessionState, StateCell};

/// The dialing side of a session.
///
/// [`connect`](Connector::connect) performs the handshake and resolves once
/// the remote side has accepted (or refuses with [`RfcError::Rejected`]).
/// The connector's own `provider` serves calls arriving from the acceptor.
pub struct Connector {
    comm: Arc<Communicator>,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connector {
    /// Dial `addr`, hand over `arguments` for the acceptor to inspect, and
    /// wait for its decision.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        arguments: Vec<String>,
        provider: Option<Provider>,
    ) -> Result<Connector, RfcError> {
        let state = Arc::new(StateCell::new(SessionState::None));
        state.begin("connect", SessionState::None, SessionState::Connecting)?;

        let mut framed = match Self::open_channel(addr, arguments).await {
            Ok(framed) => framed,
            Err(error) => {
                state.set(SessionState::Closed);
                return Err(error);
            }
        };

        // The first inbound line must be the acceptor's decision.
        let decision = match framed.next().await {
            Some(Ok(line)) => decode_line(&line),
            Some(Err(error)) => Err(RfcError::TransportFailure(error.to_string())),
            None => Err(RfcError::TransportFailure(
                "connection closed during handshake".to_owned(),
            )),
        };
        let decision = match decision {
            Ok(decision) => decision,
            Err(error) => {
                state.set(SessionState::Closed);
                return Err(error);
            }
        };
        match decision {
            WireMessage::Control(Control::Accept) => {}
            WireMessage::Control(Control::Reject) => {
                state.set(SessionState::Closed);
                return Err(RfcError::Rejected);
            }
            other => {
                state.set(SessionState::Closed);
                return Err(RfcError::TransportFailure(format!(
                    "expected a handshake decision, got {other:?}"
                )));
            }
        }

        let (outbound, queue) = mpsc::unbounded_channel();
        let (sink, stream) = framed.split();
        let comm = Communicator::new(QueueSink(outbound.clone()), state.clone(), provider);
        spawn_writer(sink, queue, comm.clone());
        state.set(SessionState::Open);
        spawn_reader(
            stream,
            comm.clone(),
            state.clone(),
            outbound.clone(),
            Arc::new(|| {}),
        );
        debug!("session established");

        Ok(Connector {
            comm,
            state,
            outbound,
        })
    }

    async fn open_channel<A: ToSocketAddrs>(
        addr: A,
        arguments: Vec<String>,
    ) -> Result<WireStream, RfcError> {
        let sock = TcpStream::connect(addr)
            .await
            .map_err(|e| RfcError::TransportFailure(e.to_string()))?;
        let mut framed: WireStream = Framed::new(sock, LinesCodec::new());

        let handshake = serde_json::to_string(&Handshake { arguments })
            .map_err(|e| RfcError::Codec(e.to_string()))?;
        framed
            .send(handshake)
            .await
            .map_err(|e| RfcError::TransportFailure(e.to_string()))?;
        Ok(framed)
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn provider(&self) -> Option<Arc<Provider>> {
        self.comm.provider()
    }

    /// Proxy onto the acceptor's provider.
    pub fn driver(&self) -> Driver {
        self.comm.driver()
    }

    /// Orderly close of the session.
    pub fn close(&self) -> Result<(), RfcError> {
        close_session(&self.state, &self.outbound, &self.comm)
    }

    /// Suspend until the session tears down.
    pub async fn join(&self) -> Result<(), RfcError> {
        self.comm.join().await
    }

    pub async fn join_for(&self, duration: Duration) -> Result<bool, RfcError> {
        self.comm.join_for(duration).await
    }

    pub async fn join_until(&self, deadline: Instant) -> Result<bool, RfcError> {
        self.comm.join_until(deadline).await
    }
}
