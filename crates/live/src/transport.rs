//! One physical WebSocket connection.
//!
//! The transport layer is agnostic to session semantics: it tracks raw
//! socket state only, and it never retries. Loss and reconnect policy live
//! in [`crate::session`].

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{CloseFrame, Message as WsMessage, frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Raw socket state. A strict subset of the session-level state: `Connected`
/// here means the socket is open, not that the service handshake finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Socket-level event, delivered in wire order on the connection's event
/// stream.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket opened; the peer has not said anything yet.
    Open,
    /// One complete inbound frame.
    Message(String),
    /// The peer closed the socket.
    Closed { code: u16, reason: String },
    /// The socket failed at the transport level.
    Failed { error: String },
}

/// Outbound instruction consumed by a transport implementation's writer.
#[derive(Debug)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Opens socket connections. Implementations must not retry; a failed
/// connection is reported once through the event stream and that is the end
/// of it.
pub trait Transport: Send + Sync {
    /// Begin a connection attempt. Never blocks: the returned handle starts
    /// in [`ConnectionState::Connecting`] and progress arrives on the event
    /// stream.
    fn connect(&self) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>);
}

/// Caller-side handle to one socket connection.
#[derive(Clone)]
pub struct TransportHandle {
    state_rx: watch::Receiver<ConnectionState>,
    out_tx: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
}

impl TransportHandle {
    pub fn new(
        state_rx: watch::Receiver<ConnectionState>,
        out_tx: mpsc::UnboundedSender<OutboundFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state_rx,
            out_tx,
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queues one text frame. Returns `false`, dropping the frame, unless
    /// the socket is currently open.
    pub fn send(&self, text: String) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        self.out_tx.send(OutboundFrame::Text(text)).is_ok()
    }

    /// Requests a graceful close. Best-effort; safe to call more than once.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.out_tx.send(OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        });
        self.cancel.cancel();
    }
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_socket(
            self.url.clone(),
            state_tx,
            event_tx,
            out_rx,
            cancel.clone(),
        ));

        (TransportHandle::new(state_rx, out_tx, cancel), event_rx)
    }
}

/// Marks the socket closed, preserving an earlier `Error`.
fn mark_closed(state_tx: &watch::Sender<ConnectionState>) {
    if *state_tx.borrow() != ConnectionState::Error {
        state_tx.send_replace(ConnectionState::Disconnected);
    }
}

async fn run_socket(
    url: String,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    mut out_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    let stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                state_tx.send_replace(ConnectionState::Error);
                let _ = event_tx.send(TransportEvent::Failed {
                    error: e.to_string(),
                });
                return;
            }
        },
        _ = cancel.cancelled() => {
            state_tx.send_replace(ConnectionState::Disconnected);
            return;
        }
    };

    state_tx.send_replace(ConnectionState::Connected);
    let _ = event_tx.send(TransportEvent::Open);

    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                        state_tx.send_replace(ConnectionState::Error);
                        let _ = event_tx.send(TransportEvent::Failed {
                            error: format!("send failed: {e}"),
                        });
                        break;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = ws_tx.send(WsMessage::Close(Some(frame))).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                    mark_closed(&state_tx);
                    break;
                }
                // Every handle is gone; nothing can be sent anymore.
                None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    mark_closed(&state_tx);
                    break;
                }
            },
            message = ws_rx.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = event_tx.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    // The service sends JSON in binary frames as well.
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = event_tx.send(TransportEvent::Message(text));
                        }
                        Err(_) => warn!("dropping non-UTF-8 binary frame"),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    mark_closed(&state_tx);
                    let _ = event_tx.send(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state_tx.send_replace(ConnectionState::Error);
                    let _ = event_tx.send(TransportEvent::Failed {
                        error: e.to_string(),
                    });
                    break;
                }
                None => {
                    mark_closed(&state_tx);
                    let _ = event_tx.send(TransportEvent::Closed {
                        code: 1006,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                mark_closed(&state_tx);
                break;
            }
        }
    }
}
