//! Shared test fixtures: an in-memory transport and small async helpers.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::Channel;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::TransportError;
use crate::transport::{EventSink, Socket, SocketEvent, Transport};

/// Endpoint on localhost with the default port layout.
pub(crate) fn test_endpoint(channel: Channel) -> Endpoint {
    let (port, path) = match channel {
        Channel::Motion => (8080, "/motion"),
        Channel::Touch => (8082, "/touch"),
    };
    Endpoint::new(channel, Scheme::Ws, Ipv4Addr::LOCALHOST, port, path)
}

/// Let spawned tasks (event drivers, timers that are due) run.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, stuck at {}", manager.state()))
        .expect("state channel closed");
}

/// One socket opened through [`FakeTransport`].
#[derive(Clone)]
pub(crate) struct FakeSocketHandle {
    pub endpoint: Endpoint,
    sink: EventSink,
    sent: Arc<Mutex<Vec<String>>>,
    close_code: Arc<Mutex<Option<u16>>>,
    fail_sends: Arc<AtomicBool>,
}

impl FakeSocketHandle {
    /// Deliver a lifecycle event as the real transport would.
    pub fn emit(&self, event: SocketEvent) {
        self.sink.emit(event);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_code(&self) -> Option<u16> {
        *self.close_code.lock().unwrap()
    }

    /// Make every further write fail as if the socket had died.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

struct FakeSocket {
    sent: Arc<Mutex<Vec<String>>>,
    close_code: Arc<Mutex<Option<u16>>>,
    fail_sends: Arc<AtomicBool>,
}

impl Socket for FakeSocket {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self, code: u16, _reason: &str) {
        *self.close_code.lock().unwrap() = Some(code);
    }
}

/// Records every socket it opens; tests drive the lifecycle by hand.
#[derive(Default)]
pub(crate) struct FakeTransport {
    sockets: Mutex<Vec<FakeSocketHandle>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn open_count_for(&self, channel: Channel) -> usize {
        self.sockets
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.endpoint.channel() == channel)
            .count()
    }

    /// The `index`-th socket opened, across all channels.
    pub fn socket(&self, index: usize) -> FakeSocketHandle {
        self.sockets.lock().unwrap()[index].clone()
    }

    /// The most recent socket opened for `channel`.
    pub fn last_socket(&self, channel: Channel) -> FakeSocketHandle {
        self.sockets
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.endpoint.channel() == channel)
            .cloned()
            .unwrap_or_else(|| panic!("no socket opened for {channel}"))
    }
}

impl Transport for FakeTransport {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn Socket> {
        let handle = FakeSocketHandle {
            endpoint: endpoint.clone(),
            sink: events,
            sent: Arc::new(Mutex::new(Vec::new())),
            close_code: Arc::new(Mutex::new(None)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        let socket = FakeSocket {
            sent: handle.sent.clone(),
            close_code: handle.close_code.clone(),
            fail_sends: handle.fail_sends.clone(),
        };
        self.sockets.lock().unwrap().push(handle);
        Box::new(socket)
    }
}
