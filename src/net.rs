pub mod client;
pub mod server;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::comm::{Communicator, FrameSink};
use crate::error::RfcError;
use crate::frame::Invoke;
use crate::state::{SessionState, StateCell};

/// Control-plane literals shared with data frames on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Accept,
    Reject,
    Close,
}

impl Control {
    pub(crate) fn literal(self) -> &'static str {
        match self {
            Control::Accept => "ACCEPT",
            Control::Reject => "REJECT",
            Control::Close => "CLOSE",
        }
    }

    pub(crate) fn from_literal(line: &str) -> Option<Control> {
        match line {
            "ACCEPT" => Some(Control::Accept),
            "REJECT" => Some(Control::Reject),
            "CLOSE" => Some(Control::Close),
            _ => None,
        }
    }
}

/// One line on the wire: a bare control literal or a JSON-encoded frame.
#[derive(Debug, PartialEq)]
pub(crate) enum WireMessage {
    Control(Control),
    Invoke(Invoke),
}

/// First line a connector sends: free-form string arguments the acceptor
/// hands to whoever decides on the connection.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Handshake {
    pub arguments: Vec<String>,
}

/// A control literal is not valid JSON, so decoding matches the known
/// literals first and only then attempts a structured decode.
pub(crate) fn decode_line(line: &str) -> Result<WireMessage, RfcError> {
    if let Some(control) = Control::from_literal(line) {
        return Ok(WireMessage::Control(control));
    }
    serde_json::from_str(line)
        .map(WireMessage::Invoke)
        .map_err(|e| RfcError::Codec(e.to_string()))
}

pub(crate) fn encode_line(message: &WireMessage) -> Result<String, RfcError> {
    match message {
        WireMessage::Control(control) => Ok(control.literal().to_owned()),
        WireMessage::Invoke(frame) => {
            serde_json::to_string(frame).map_err(|e| RfcError::Codec(e.to_string()))
        }
    }
}

/// What the writer task pulls off its queue. `Hangup` flushes and closes
/// the socket; the session owner sends it as the last word.
pub(crate) enum Outbound {
    Message(WireMessage),
    Hangup,
}

pub(crate) type WireStream = Framed<TcpStream, LinesCodec>;

/// Outbound half handed to the communicator: frames funnel into the writer
/// queue, which preserves issue order on the socket.
pub(crate) struct QueueSink(pub mpsc::UnboundedSender<Outbound>);

impl FrameSink for QueueSink {
    fn send(&self, frame: Invoke) -> Result<(), RfcError> {
        self.0
            .send(Outbound::Message(WireMessage::Invoke(frame)))
            .map_err(|_| RfcError::TransportFailure("writer task is gone".to_owned()))
    }
}

/// Single writer per session: every outbound line goes through here, so
/// requests leave in the order they were issued.
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WireStream, String>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    comm: Arc<Communicator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outbound) = queue.recv().await {
            let message = match outbound {
                Outbound::Message(message) => message,
                Outbound::Hangup => break,
            };
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(error) => {
                    warn!(%error, "dropping unencodable outbound message");
                    continue;
                }
            };
            if let Err(error) = sink.send(line).await {
                comm.shutdown(Some(RfcError::TransportFailure(error.to_string())));
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Inbound pump: data frames go to the communicator, a `CLOSE` literal runs
/// the orderly local close, and a dead socket tears the session down.
pub(crate) fn spawn_reader(
    mut stream: SplitStream<WireStream>,
    comm: Arc<Communicator>,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<Outbound>,
    eraser: Arc<dyn Fn() + Send + Sync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(line)) => match decode_line(&line) {
                    Ok(WireMessage::Invoke(frame)) => comm.deliver(frame),
                    Ok(WireMessage::Control(Control::Close)) => {
                        debug!("peer asked to close the session");
                        let _ = close_session(&state, &outbound, &comm);
                        break;
                    }
                    Ok(WireMessage::Control(control)) => {
                        debug!(literal = control.literal(), "ignoring control message");
                    }
                    Err(error) => warn!(%error, "ignoring malformed line"),
                },
                Some(Err(error)) => {
                    teardown(&comm, &outbound, RfcError::TransportFailure(error.to_string()));
                    break;
                }
                None => {
                    if comm.state() != SessionState::Closed {
                        teardown(
                            &comm,
                            &outbound,
                            RfcError::TransportFailure("connection reset by peer".to_owned()),
                        );
                    }
                    break;
                }
            }
        }
        eraser();
    })
}

/// Orderly close: `Open → Closing`, tell the peer, reject what is still in
/// flight, release joiners, settle in `Closed`.
pub(crate) fn close_session(
    state: &StateCell,
    outbound: &mpsc::UnboundedSender<Outbound>,
    comm: &Communicator,
) -> Result<(), RfcError> {
    state.begin("close", SessionState::Open, SessionState::Closing)?;
    let _ = outbound.send(Outbound::Message(WireMessage::Control(Control::Close)));
    comm.shutdown(None);
    let _ = outbound.send(Outbound::Hangup);
    Ok(())
}

fn teardown(comm: &Communicator, outbound: &mpsc::UnboundedSender<Outbound>, error: RfcError) {
    comm.shutdown(Some(error));
    let _ = outbound.send(Outbound::Hangup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{InvokeRequest, InvokeResponse};
    use serde_json::json;

    #[test]
    fn known_literals_decode_as_control() {
        assert_eq!(
            decode_line("ACCEPT").unwrap(),
            WireMessage::Control(Control::Accept)
        );
        assert_eq!(
            decode_line("REJECT").unwrap(),
            WireMessage::Control(Control::Reject)
        );
        assert_eq!(
            decode_line("CLOSE").unwrap(),
            WireMessage::Control(Control::Close)
        );
    }

    #[test]
    fn structured_lines_decode_as_frames() {
        let line = r#"{"uid":3,"listener":"echo","parameters":["hi"]}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            WireMessage::Invoke(Invoke::Request(InvokeRequest {
                uid: 3,
                listener: "echo".to_owned(),
                parameters: vec![json!("hi")],
            }))
        );

        let line = r#"{"uid":3,"success":false,"value":{"name":"Error","message":"boom"}}"#;
        match decode_line(line).unwrap() {
            WireMessage::Invoke(Invoke::Response(response)) => {
                assert_eq!(response.uid, 3);
                assert!(!response.success);
            }
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[test]
    fn garbage_lines_are_codec_errors() {
        assert!(matches!(decode_line("DISCO"), Err(RfcError::Codec(_))));
        assert!(matches!(decode_line("{oops"), Err(RfcError::Codec(_))));
    }

    #[test]
    fn control_encodes_as_bare_literal() {
        let line = encode_line(&WireMessage::Control(Control::Accept)).unwrap();
        assert_eq!(line, "ACCEPT");

        let line =
            encode_line(&WireMessage::Invoke(Invoke::Response(InvokeResponse::success(
                1,
                json!(null),
            ))))
            .unwrap();
        assert_eq!(
            line,
            r#"{"uid":1,"success":true,"value":null}"#
        );
    }
}
