//! Channel Context: the session registry.
//!
//! Holds at most one [`ConnectionManager`] per channel, all pointed at the
//! same host, plus the foreground channel shared with the multiplexer.

use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::channel::Channel;
use crate::config::Settings;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::endpoint::{EndpointSet, resolve};
use crate::error::EndpointError;
use crate::transport::Transport;

/// One channel's connection, as shown to a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub url: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub status: String,
}

struct Session {
    endpoints: EndpointSet,
    managers: HashMap<Channel, Arc<ConnectionManager>>,
    _heartbeat: Option<DropGuard>,
}

impl Session {
    fn shutdown(self) {
        for channel in Channel::ALL {
            if let Some(manager) = self.managers.get(&channel) {
                manager.shutdown();
            }
        }
    }
}

pub struct ChannelContext {
    settings: Settings,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    session: RwLock<Option<Session>>,
    foreground: watch::Sender<Option<Channel>>,
}

impl ChannelContext {
    /// An empty context. Must be called within a tokio runtime.
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        let (foreground, _) = watch::channel(None);
        Self {
            settings,
            transport,
            runtime: Handle::current(),
            session: RwLock::new(None),
            foreground,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Point the session at `host` and connect every channel.
    ///
    /// Invalid input is rejected before anything is touched. The same host
    /// keeps the current session; a new host closes the old managers first.
    pub fn set_host(&self, host: &str) -> Result<EndpointSet, EndpointError> {
        let endpoints = resolve(host, &self.settings.endpoint)?;

        let mut session = self.write();
        if let Some(current) = session.as_ref() {
            if current.endpoints == endpoints {
                debug!(host = %endpoints.host(), "host unchanged, keeping session");
                return Ok(endpoints);
            }
        }
        if let Some(old) = session.take() {
            info!(old = %old.endpoints.host(), new = %endpoints.host(), "host changed, tearing down session");
            old.shutdown();
        }

        let mut managers = HashMap::with_capacity(Channel::ALL.len());
        for endpoint in endpoints.iter() {
            let manager = Arc::new(ConnectionManager::new(
                endpoint.clone(),
                Arc::clone(&self.transport),
                &self.settings.connection,
            ));
            manager.connect();
            managers.insert(endpoint.channel(), manager);
        }

        let heartbeat = self
            .settings
            .session
            .status_interval
            .map(|every| self.spawn_heartbeat(every, &managers));

        info!(
            host = %endpoints.host(),
            motion = %endpoints.get(Channel::Motion),
            touch = %endpoints.get(Channel::Touch),
            "session started"
        );
        *session = Some(Session {
            endpoints: endpoints.clone(),
            managers,
            _heartbeat: heartbeat,
        });
        Ok(endpoints)
    }

    /// Close every manager and forget the host.
    pub fn teardown(&self) {
        if let Some(old) = self.write().take() {
            info!(host = %old.endpoints.host(), "session torn down");
            old.shutdown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.read().is_some()
    }

    pub fn host(&self) -> Option<Ipv4Addr> {
        self.read().as_ref().map(|s| s.endpoints.host())
    }

    pub fn endpoints(&self) -> Option<EndpointSet> {
        self.read().as_ref().map(|s| s.endpoints.clone())
    }

    pub fn manager(&self, channel: Channel) -> Option<Arc<ConnectionManager>> {
        self.read()
            .as_ref()
            .and_then(|s| s.managers.get(&channel).cloned())
    }

    pub fn foreground(&self) -> Option<Channel> {
        *self.foreground.borrow()
    }

    pub fn set_foreground(&self, channel: Option<Channel>) {
        let previous = self.foreground.send_replace(channel);
        if previous != channel {
            debug!(from = ?previous, to = ?channel, "foreground changed");
        }
    }

    /// Set the foreground from a screen name. Screens that own no channel
    /// clear it.
    pub fn set_foreground_screen(&self, screen: &str) -> Option<Channel> {
        let channel = Channel::from_screen(screen);
        self.set_foreground(channel);
        channel
    }

    pub fn watch_foreground(&self) -> watch::Receiver<Option<Channel>> {
        self.foreground.subscribe()
    }

    /// Status of every channel. Empty without a session.
    pub fn status(&self) -> Vec<ChannelStatus> {
        let session = self.read();
        let Some(session) = session.as_ref() else {
            return Vec::new();
        };
        Channel::ALL
            .iter()
            .filter_map(|ch| session.managers.get(ch))
            .map(|m| channel_status(m))
            .collect()
    }

    fn spawn_heartbeat(
        &self,
        every: Duration,
        managers: &HashMap<Channel, Arc<ConnectionManager>>,
    ) -> DropGuard {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let managers: Vec<_> = Channel::ALL
            .iter()
            .filter_map(|ch| managers.get(ch).cloned())
            .collect();

        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for manager in &managers {
                            info!(
                                channel = %manager.channel(),
                                state = %manager.state(),
                                received = manager.messages_received(),
                                "{}",
                                manager.status()
                            );
                        }
                    }
                }
            }
        });

        cancel.drop_guard()
    }
}

impl Drop for ChannelContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn channel_status(manager: &ConnectionManager) -> ChannelStatus {
    let state = manager.state();
    ChannelStatus {
        channel: manager.channel(),
        url: manager.endpoint().url(),
        state,
        connected: state == ConnectionState::Open,
        status: manager.status(),
    }
}
