use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::comm::Communicator;
use crate::driver::Driver;
use crate::error::RfcError;
use crate::net::{
    close_session, spawn_reader, spawn_writer, Control, Handshake, Outbound, QueueSink,
    WireMessage, WireStream,
};
use crate::provider::Provider;
use crate::state::{SessionState, StateCell};

type Registry = Mutex<HashMap<u64, Arc<Acceptor>>>;

/// Listens for connectors and hands each connection to an async handler as
/// an [`Acceptor`], which the handler must `accept` or `reject`.
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    listener_task: JoinHandle<()>,
}

impl Server {
    /// Bind `port` (0 picks a free one) and serve until [`close`](Server::close).
    /// The handler runs as its own task per connection.
    pub async fn open<H, Fut>(port: u16, handler: H) -> io::Result<Server>
    where
        H: Fn(Arc<Acceptor>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let local_addr = listener.local_addr()?;
        let registry: Arc<Registry> = Arc::default();
        info!(%local_addr, "server listening");

        let handler = Arc::new(handler);
        let registry_for_loop = registry.clone();
        let listener_task = task::spawn(async move {
            let sequence = AtomicU64::new(0);
            loop {
                let (sock, peer_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(%error, "stopped accepting connections");
                        break;
                    }
                };
                let id = sequence.fetch_add(1, Ordering::Relaxed);
                let registry = registry_for_loop.clone();
                let handler = handler.clone();
                task::spawn(async move {
                    match Acceptor::handshake(sock, id, registry.clone()).await {
                        Ok(acceptor) => {
                            debug!(%peer_addr, id, "connection awaiting a decision");
                            registry
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(id, acceptor.clone());
                            (*handler)(acceptor).await;
                        }
                        Err(error) => warn!(%peer_addr, %error, "dropping connection"),
                    }
                });
            }
        });

        Ok(Server {
            local_addr,
            registry,
            listener_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live sessions, pending decisions included.
    pub fn connections(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop listening and close every live session.
    pub fn close(&self) {
        self.listener_task.abort();
        let acceptors: Vec<Arc<Acceptor>> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for acceptor in acceptors {
            // Sessions still waiting on a decision are rejected; open ones
            // are closed. Anything else already tore down on its own.
            let _ = match acceptor.state() {
                SessionState::None => acceptor.reject(),
                _ => acceptor.close(),
            };
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

/// One inbound connection, parked until user code decides on it.
///
/// Created in the `None` state with the connector's handshake arguments.
/// [`accept`](Acceptor::accept) binds a provider and opens the session;
/// [`reject`](Acceptor::reject) refuses it. Both are legal exactly once.
pub struct Acceptor {
    arguments: Vec<String>,
    comm: Arc<Communicator>,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Outbound>,
    parked_reader: Mutex<Option<futures::stream::SplitStream<WireStream>>>,
    eraser: Arc<dyn Fn() + Send + Sync>,
}

impl Acceptor {
    /// Read the connector's handshake line and park the connection.
    async fn handshake(
        sock: TcpStream,
        id: u64,
        registry: Arc<Registry>,
    ) -> Result<Arc<Acceptor>, RfcError> {
        let mut framed: WireStream = Framed::new(sock, LinesCodec::new());
        let line = match framed.next().await {
            Some(Ok(line)) => line,
            Some(Err(error)) => return Err(RfcError::TransportFailure(error.to_string())),
            None => {
                return Err(RfcError::TransportFailure(
                    "connection closed before handshake".to_owned(),
                ))
            }
        };
        let handshake: Handshake =
            serde_json::from_str(&line).map_err(|e| RfcError::Codec(e.to_string()))?;

        let state = Arc::new(StateCell::new(SessionState::None));
        let (outbound, queue) = mpsc::unbounded_channel();
        let (sink, stream) = framed.split();
        let comm = Communicator::new(QueueSink(outbound.clone()), state.clone(), None);
        spawn_writer(sink, queue, comm.clone());

        let eraser: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        Ok(Arc::new(Acceptor {
            arguments: handshake.arguments,
            comm,
            state,
            outbound,
            parked_reader: Mutex::new(Some(stream)),
            eraser,
        }))
    }

    /// Arguments the connector sent with its handshake.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn provider(&self) -> Option<Arc<Provider>> {
        self.comm.provider()
    }

    /// Open the session: bind `provider`, start pumping inbound frames, and
    /// tell the connector it is in.
    pub fn accept(&self, provider: Provider) -> Result<(), RfcError> {
        self.state
            .begin("accept", SessionState::None, SessionState::Accepting)?;
        self.comm.set_provider(provider);

        let reader = self
            .parked_reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(reader) = reader else {
            unreachable!("reader stays parked until the first accept");
        };

        let _ = self
            .outbound
            .send(Outbound::Message(WireMessage::Control(Control::Accept)));
        self.state.set(SessionState::Open);
        spawn_reader(
            reader,
            self.comm.clone(),
            self.state.clone(),
            self.outbound.clone(),
            self.eraser.clone(),
        );
        debug!("session accepted");
        Ok(())
    }

    /// Refuse the session: tell the connector, tear down, drop the channel.
    pub fn reject(&self) -> Result<(), RfcError> {
        self.state
            .begin("reject", SessionState::None, SessionState::Rejecting)?;
        let _ = self
            .outbound
            .send(Outbound::Message(WireMessage::Control(Control::Reject)));
        self.comm.shutdown(None);
        let _ = self.outbound.send(Outbound::Hangup);
        (self.eraser)();
        debug!("session rejected");
        Ok(())
    }

    /// Orderly close of an open session.
    pub fn close(&self) -> Result<(), RfcError> {
        close_session(&self.state, &self.outbound, &self.comm)?;
        (self.eraser)();
        Ok(())
    }

    /// Proxy onto the connector's provider.
    pub fn driver(&self) -> Driver {
        self.comm.driver()
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
