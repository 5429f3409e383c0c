//! ConnectionManager: one socket to one endpoint, with auto-reconnect.
//!
//! Availability over reliability: nothing is buffered, producers never
//! block, and every send is a best-effort attempt gated by socket readiness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{ConnectionState, Effect, Event, Machine};
use crate::channel::Channel;
use crate::config::ConnectionConfig;
use crate::endpoint::Endpoint;
use crate::transport::{EventSink, Socket, SocketEvent, Transport};

/// What happened to a payload handed to [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No socket existed yet; a connect was started and the payload dropped.
    NoSocket,
    /// The socket exists but is not open; the payload was dropped.
    NotOpen(ConnectionState),
    /// The transport rejected the write; a reconnect was started.
    Failed,
}

/// Owns the lifecycle of exactly one socket connection.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    shared: Mutex<Shared>,
    events_tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
    state_tx: watch::Sender<ConnectionState>,
    /// Stops the event driver and every reconnect timer.
    cancel: CancellationToken,
    messages_received: AtomicU64,
}

struct Shared {
    machine: Machine,
    socket: Option<Box<dyn Socket>>,
    /// Bumped on every open; events tagged with an older value are stale.
    generation: u64,
    reconnect: Option<CancellationToken>,
}

impl ConnectionManager {
    /// Create a manager for `endpoint`. Nothing is opened until
    /// [`connect`](Self::connect). Must be called within a tokio runtime.
    pub fn new(endpoint: Endpoint, transport: Arc<dyn Transport>, config: &ConnectionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let inner = Arc::new(Inner {
            endpoint,
            transport,
            runtime: Handle::current(),
            shared: Mutex::new(Shared {
                machine: Machine::new(config.reconnect_delay),
                socket: None,
                generation: 0,
                reconnect: None,
            }),
            events_tx,
            state_tx,
            cancel: CancellationToken::new(),
            messages_received: AtomicU64::new(0),
        });

        inner.runtime.spawn(drive_events(
            Arc::downgrade(&inner),
            events_rx,
            inner.cancel.clone(),
        ));

        Self { inner }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn channel(&self) -> Channel {
        self.inner.endpoint.channel()
    }

    /// Open the socket. No-op while connecting or open.
    pub fn connect(&self) {
        self.inner.handle(Event::ConnectRequested);
    }

    /// Fire-and-forget send of one text frame.
    pub fn send(&self, text: String) -> SendOutcome {
        self.inner.send(text)
    }

    /// Deliberate shutdown with normal-closure semantics. Suppresses reconnect.
    pub fn close(&self) {
        self.inner.handle(Event::CloseRequested);
    }

    /// Close and stop the event driver. The manager is inert afterwards.
    pub fn shutdown(&self) {
        self.close();
        self.inner.cancel.cancel();
        self.inner.lock().socket = None;
        debug!(channel = %self.channel(), "connection manager shut down");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Human-readable status snapshot.
    pub fn status(&self) -> String {
        let shared = self.inner.lock();
        match shared.socket {
            None => format!("{} {}: no socket", self.channel(), self.inner.endpoint),
            Some(_) => format!(
                "{} {}: {}",
                self.channel(),
                self.inner.endpoint,
                shared.machine.state()
            ),
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Count of inbound messages. They carry no protocol meaning.
    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(self: &Arc<Self>, event: Event) {
        // After shutdown nothing may open a socket the driver would never hear from.
        if self.cancel.is_cancelled()
            && matches!(event, Event::ConnectRequested | Event::ReconnectDue)
        {
            return;
        }
        let mut shared = self.lock();
        self.apply(&mut shared, event);
    }

    fn send(self: &Arc<Self>, text: String) -> SendOutcome {
        let mut shared = self.lock();
        let state = shared.machine.state();

        if self.cancel.is_cancelled() {
            return SendOutcome::NotOpen(state);
        }

        if shared.socket.is_none() {
            debug!(channel = %self.endpoint.channel(), "no socket instance, connecting");
            self.apply(&mut shared, Event::ConnectRequested);
            return SendOutcome::NoSocket;
        }

        if state != ConnectionState::Open {
            debug!(channel = %self.endpoint.channel(), state = %state, "socket not open, dropping");
            return SendOutcome::NotOpen(state);
        }

        let result = match shared.socket.as_ref() {
            Some(socket) => socket.send_text(text),
            None => return SendOutcome::NotOpen(state),
        };

        match result {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!(channel = %self.endpoint.channel(), error = %e, "send failed, reconnecting");
                self.apply(&mut shared, Event::SendFailed);
                SendOutcome::Failed
            }
        }
    }

    /// Run one transition and carry out its effects under the lock.
    ///
    /// Transports never call back synchronously, so opening or closing a
    /// socket here cannot re-enter the manager.
    fn apply(self: &Arc<Self>, shared: &mut Shared, event: Event) {
        let before = shared.machine.state();
        let effects = shared.machine.apply(event);
        let after = shared.machine.state();

        for effect in effects {
            match effect {
                Effect::OpenSocket => {
                    shared.generation += 1;
                    info!(
                        channel = %self.endpoint.channel(),
                        url = %self.endpoint,
                        generation = shared.generation,
                        "connecting"
                    );
                    let sink = EventSink::new(shared.generation, self.events_tx.clone());
                    shared.socket = Some(self.transport.open(&self.endpoint, sink));
                }
                Effect::CloseSocket { code } => {
                    if let Some(socket) = shared.socket.as_ref() {
                        socket.close(code, "Closing connection normally");
                    }
                }
                Effect::ScheduleReconnect(delay) => {
                    if let Some(previous) = shared.reconnect.take() {
                        previous.cancel();
                    }
                    let token = self.cancel.child_token();
                    shared.reconnect = Some(token.clone());
                    info!(
                        channel = %self.endpoint.channel(),
                        delay_ms = delay.as_millis() as u64,
                        "scheduling reconnect"
                    );
                    self.runtime
                        .spawn(reconnect_after(Arc::downgrade(self), delay, token));
                }
                Effect::CancelReconnect => {
                    if let Some(token) = shared.reconnect.take() {
                        token.cancel();
                    }
                }
            }
        }

        if before != after {
            debug!(
                channel = %self.endpoint.channel(),
                from = %before,
                to = %after,
                "state transition"
            );
            self.state_tx.send_replace(after);
        }
    }

    fn on_socket_event(self: &Arc<Self>, generation: u64, event: SocketEvent) {
        let mut shared = self.lock();
        if generation != shared.generation {
            debug!(
                channel = %self.endpoint.channel(),
                generation,
                current = shared.generation,
                "ignoring event from replaced socket"
            );
            return;
        }

        let channel = self.endpoint.channel();
        let event = match event {
            SocketEvent::Opened => {
                info!(channel = %channel, url = %self.endpoint, "connected");
                Event::Opened
            }
            SocketEvent::Message(text) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %channel, len = text.len(), "received message");
                return;
            }
            SocketEvent::PeerClosing { code } => {
                debug!(channel = %channel, code, "peer is closing");
                Event::PeerClosing
            }
            SocketEvent::Closed { code, reason } => {
                if shared.machine.is_deliberately_closed() {
                    info!(channel = %channel, code, "closed");
                } else {
                    warn!(channel = %channel, code, reason = %reason, "connection closed");
                }
                Event::Closed { code }
            }
            SocketEvent::Error(message) => {
                warn!(channel = %channel, error = %message, "connection error");
                Event::Errored
            }
        };
        self.apply(&mut shared, event);
    }
}

/// Apply socket events in delivery order until the manager goes away.
async fn drive_events(
    inner: Weak<Inner>,
    mut events_rx: mpsc::UnboundedReceiver<(u64, SocketEvent)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = events_rx.recv() => {
                let Some((generation, event)) = next else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.on_socket_event(generation, event);
            }
        }
    }
}

async fn reconnect_after(inner: Weak<Inner>, delay: Duration, token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {
            if let Some(inner) = inner.upgrade() {
                debug!(channel = %inner.endpoint.channel(), "reconnect timer fired");
                inner.handle(Event::ReconnectDue);
            }
        }
    }
}
