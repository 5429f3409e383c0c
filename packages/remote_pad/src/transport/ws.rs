use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{
    self, Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::{
    ABNORMAL_CLOSURE, EventSink, NO_STATUS, NORMAL_CLOSURE, Socket, SocketEvent, Transport,
};
use crate::config::ConnectionConfig;
use crate::endpoint::Endpoint;
use crate::error::TransportError;

/// WebSocket transport backed by tokio-tungstenite.
///
/// Every socket runs as its own task. The task emits exactly one terminal
/// event (`Closed` or `Error`) and then exits. Once a close frame has been
/// sent or received, the peer has `close_timeout` to finish the handshake.
pub struct WsTransport {
    runtime: Handle,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WsTransport {
    /// Must be called from within a tokio runtime; sockets are spawned on it.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            runtime: Handle::current(),
            connect_timeout: config.connect_timeout,
            close_timeout: config.close_timeout,
        }
    }
}

impl Transport for WsTransport {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn Socket> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.runtime.spawn(run_socket(
            endpoint.url(),
            self.connect_timeout,
            self.close_timeout,
            rx,
            events,
            cancel.clone(),
        ));
        Box::new(WsSocket {
            tx,
            _cancel: cancel.drop_guard(),
        })
    }
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct WsSocket {
    tx: mpsc::UnboundedSender<Outbound>,
    /// Dropping the handle aborts a pending connect and closes the socket.
    _cancel: DropGuard,
}

impl Socket for WsSocket {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

async fn run_socket(
    url: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
    cancel: CancellationToken,
) {
    let connect = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str())) => result,
    };

    let ws_stream = match connect {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            let err = TransportError::Connect(e.to_string());
            events.emit(SocketEvent::Error(err.to_string()));
            return;
        }
        Err(_) => {
            let err = TransportError::Connect(format!("timed out after {connect_timeout:?}"));
            events.emit(SocketEvent::Error(err.to_string()));
            return;
        }
    };

    debug!(url = %url, generation = events.generation(), "socket connected");
    events.emit(SocketEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    // Set once either side has sent a close frame.
    let mut close_code: Option<u16> = None;
    let mut close_reason = String::new();
    let mut close_deadline: Option<Instant> = None;

    loop {
        let handshake_expired = async move {
            match close_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(close_message(NORMAL_CLOSURE, "")).await;
                return;
            }
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.emit(SocketEvent::Error(format!("send failed: {e}")));
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    if close_code.is_none() {
                        close_code = Some(code);
                        close_reason = reason.clone();
                        close_deadline = Some(Instant::now() + close_timeout);
                    }
                    if write.send(close_message(code, &reason)).await.is_err() {
                        events.emit(SocketEvent::Closed { code, reason });
                        return;
                    }
                }
                None => {
                    let _ = write.send(close_message(NORMAL_CLOSURE, "")).await;
                    return;
                }
            },
            _ = handshake_expired => {
                let code = close_code.unwrap_or(NORMAL_CLOSURE);
                debug!(url = %url, code, "close handshake timed out, dropping connection");
                events.emit(SocketEvent::Closed { code, reason: close_reason });
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SocketEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    if close_code.is_none() {
                        let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(NO_STATUS);
                        close_code = Some(code);
                        close_reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        close_deadline = Some(Instant::now() + close_timeout);
                        events.emit(SocketEvent::PeerClosing { code });
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => {
                    events.emit(SocketEvent::Closed {
                        code: close_code.unwrap_or(ABNORMAL_CLOSURE),
                        reason: close_reason,
                    });
                    return;
                }
                Some(Err(e)) => {
                    match close_code {
                        Some(code) => events.emit(SocketEvent::Closed { code, reason: close_reason }),
                        None => events.emit(SocketEvent::Error(e.to_string())),
                    };
                    return;
                }
            }
        }
    }
}
