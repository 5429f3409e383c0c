//! Socket transport seam.
//!
//! A [`Transport`] opens sockets; a [`Socket`] is the handle the connection
//! manager owns. Lifecycle callbacks (open, message, close, error) are not
//! invoked directly: the transport pushes [`SocketEvent`]s into an
//! [`EventSink`], and the manager's driver task applies them in order. This
//! keeps transport callbacks from re-entering the manager while it holds
//! its own lock.
//!
//! - `ws`: tokio-tungstenite implementation

mod ws;

pub use ws::WsTransport;

use tokio::sync::mpsc;

use crate::endpoint::Endpoint;
use crate::error::TransportError;

/// WebSocket close code for a deliberate, normal shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carried no status.
pub const NO_STATUS: u16 = 1005;

/// Low-level lifecycle event emitted by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    /// The peer started the close handshake.
    PeerClosing { code: u16 },
    Closed { code: u16, reason: String },
    Error(String),
}

/// Where a socket reports its events. Tagged with the generation of the
/// socket it was handed to, so events from a replaced socket can be ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, SocketEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns false once the manager is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Handle to one open (or opening) socket.
pub trait Socket: Send {
    /// Queue a text frame. Must not block.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Start the close handshake with the given code.
    fn close(&self, code: u16, reason: &str);
}

/// Opens sockets to endpoints.
///
/// `open` must return immediately; connection progress is reported through
/// `events`, never by calling back into the caller.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn Socket>;
}
