//! Pure connection state machine.
//!
//! `Machine::apply` maps `(state, event)` to a new state plus the side
//! effects the manager must carry out. Nothing here touches a socket or a
//! timer, so every transition is testable without a network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::transport::NORMAL_CLOSURE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket has been opened yet.
    Idle,
    Connecting,
    Open,
    /// The peer started the close handshake.
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ConnectRequested,
    /// The reconnect timer fired.
    ReconnectDue,
    Opened,
    PeerClosing,
    Closed { code: u16 },
    Errored,
    SendFailed,
    CloseRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenSocket,
    CloseSocket { code: u16 },
    ScheduleReconnect(Duration),
    CancelReconnect,
}

#[derive(Debug, Clone)]
pub struct Machine {
    state: ConnectionState,
    deliberately_closed: bool,
    reconnect_pending: bool,
    reconnect_delay: Duration,
}

impl Machine {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            deliberately_closed: false,
            reconnect_pending: false,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_deliberately_closed(&self) -> bool {
        self.deliberately_closed
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::ConnectRequested => self.begin_connect(),
            Event::ReconnectDue => {
                self.reconnect_pending = false;
                if self.deliberately_closed {
                    Vec::new()
                } else {
                    self.begin_connect()
                }
            }
            Event::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                }
                Vec::new()
            }
            Event::PeerClosing => {
                if self.state == ConnectionState::Open {
                    self.state = ConnectionState::Closing;
                }
                Vec::new()
            }
            Event::Closed { code } => self.lost(code != NORMAL_CLOSURE),
            Event::Errored => self.lost(true),
            Event::SendFailed => {
                if self.state == ConnectionState::Open {
                    self.state = ConnectionState::Closed;
                }
                self.begin_connect()
            }
            Event::CloseRequested => {
                let live = matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
                );
                self.deliberately_closed = true;
                self.reconnect_pending = false;
                if self.state != ConnectionState::Idle {
                    self.state = ConnectionState::Closed;
                }

                let mut effects = vec![Effect::CancelReconnect];
                if live {
                    effects.push(Effect::CloseSocket {
                        code: NORMAL_CLOSURE,
                    });
                }
                effects
            }
        }
    }

    /// Open a socket unless one is live or still closing.
    fn begin_connect(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                Vec::new()
            }
            ConnectionState::Idle | ConnectionState::Closed => {
                self.deliberately_closed = false;
                self.state = ConnectionState::Connecting;
                let mut effects = Vec::with_capacity(2);
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    effects.push(Effect::CancelReconnect);
                }
                effects.push(Effect::OpenSocket);
                effects
            }
        }
    }

    /// The live socket went away.
    fn lost(&mut self, unexpected: bool) -> Vec<Effect> {
        match self.state {
            // Already closed: a trailing close after an error, or the echo of
            // our own deliberate close.
            ConnectionState::Idle | ConnectionState::Closed => Vec::new(),
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                self.state = ConnectionState::Closed;
                if unexpected && !self.deliberately_closed {
                    self.reconnect_pending = true;
                    vec![Effect::ScheduleReconnect(self.reconnect_delay)]
                } else {
                    Vec::new()
                }
            }
        }
    }
}
