//! Stream Multiplexer: throttle, gate, and frame outbound samples.
//!
//! For each offered sample, in order:
//!
//! 1. Rate limit: drop if less than the minimum interval has passed since the
//!    channel's last accepted sample. The most recent state wins; nothing is
//!    queued. The timestamp advances even if a later gate drops the sample.
//! 2. Wrap the sample in an [`Envelope`].
//! 3. Gate: the channel's manager must be open and the channel must be the
//!    foreground channel.
//! 4. Serialize and hand to [`ConnectionManager::send`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::config::StreamConfig;
use crate::connection::{ConnectionManager, SendOutcome};
use crate::context::ChannelContext;
use crate::sample::{Envelope, Sample};

/// The decision taken for one offered sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Forwarded,
    RateLimited,
    /// Another channel is in the foreground.
    NotForeground,
    NotConnected,
    /// No session: no host has been set, or it was torn down.
    NoSession,
    /// The sample variant does not belong to the offered channel.
    ChannelMismatch,
    EncodeFailed,
    /// Passed the gates but the manager dropped it (state changed meanwhile).
    SendDropped(SendOutcome),
}

impl fmt::Display for OfferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferOutcome::Forwarded => f.write_str("forwarded"),
            OfferOutcome::RateLimited => f.write_str("rate limited"),
            OfferOutcome::NotForeground => f.write_str("not foreground"),
            OfferOutcome::NotConnected => f.write_str("not connected"),
            OfferOutcome::NoSession => f.write_str("no session"),
            OfferOutcome::ChannelMismatch => f.write_str("channel mismatch"),
            OfferOutcome::EncodeFailed => f.write_str("encode failed"),
            OfferOutcome::SendDropped(outcome) => write!(f, "send dropped ({outcome:?})"),
        }
    }
}

/// Per-channel offer counters.
#[derive(Debug, Default)]
struct OfferStats {
    forwarded: AtomicU64,
    rate_limited: AtomicU64,
    not_foreground: AtomicU64,
    not_connected: AtomicU64,
    dropped: AtomicU64,
}

impl OfferStats {
    fn record(&self, outcome: OfferOutcome) {
        let counter = match outcome {
            OfferOutcome::Forwarded => &self.forwarded,
            OfferOutcome::RateLimited => &self.rate_limited,
            OfferOutcome::NotForeground => &self.not_foreground,
            OfferOutcome::NotConnected | OfferOutcome::NoSession => &self.not_connected,
            OfferOutcome::ChannelMismatch
            | OfferOutcome::EncodeFailed
            | OfferOutcome::SendDropped(_) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, channel: Channel) -> OfferStatsSnapshot {
        OfferStatsSnapshot {
            channel,
            forwarded: self.forwarded.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            not_foreground: self.not_foreground.load(Ordering::Relaxed),
            not_connected: self.not_connected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one channel's offer counters (for logging/serialization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferStatsSnapshot {
    pub channel: Channel,
    pub forwarded: u64,
    pub rate_limited: u64,
    pub not_foreground: u64,
    pub not_connected: u64,
    pub dropped: u64,
}

struct ChannelGate {
    last_sent: Mutex<Option<Instant>>,
    stats: OfferStats,
}

impl ChannelGate {
    fn new() -> Self {
        Self {
            last_sent: Mutex::new(None),
            stats: OfferStats::default(),
        }
    }

    /// Accept the sample if the interval has elapsed, recording `now`.
    fn admit(&self, now: Instant, min_interval: Duration) -> bool {
        let mut last = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < min_interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

pub struct Multiplexer {
    context: Arc<ChannelContext>,
    runtime: Handle,
    min_interval: Duration,
    gates: [ChannelGate; 2],
}

impl Multiplexer {
    /// Must be called within a tokio runtime; attached producers run on it.
    pub fn new(context: Arc<ChannelContext>, config: &StreamConfig) -> Self {
        Self {
            context,
            runtime: Handle::current(),
            min_interval: config.min_send_interval,
            gates: [ChannelGate::new(), ChannelGate::new()],
        }
    }

    /// Offer one sample on `channel`. Never blocks and never fails loudly.
    pub fn offer(&self, channel: Channel, sample: Sample) -> OfferOutcome {
        self.offer_at(channel, sample, Instant::now())
    }

    /// [`offer`](Self::offer) with an explicit clock reading.
    pub fn offer_at(&self, channel: Channel, sample: Sample, now: Instant) -> OfferOutcome {
        let gate = &self.gates[channel.index()];
        let outcome = self.decide(channel, sample, now, gate);
        gate.stats.record(outcome);
        outcome
    }

    fn decide(&self, channel: Channel, sample: Sample, now: Instant, gate: &ChannelGate) -> OfferOutcome {
        if sample.channel() != channel {
            warn!(channel = %channel, sample = %sample.channel(), "sample offered on wrong channel");
            return OfferOutcome::ChannelMismatch;
        }

        if !gate.admit(now, self.min_interval) {
            return OfferOutcome::RateLimited;
        }

        let envelope = Envelope::new(sample);

        let Some(manager) = self.context.manager(channel) else {
            return OfferOutcome::NoSession;
        };
        if !manager.is_connected() {
            debug!(channel = %channel, status = %manager.status(), "cannot send, not connected");
            return OfferOutcome::NotConnected;
        }
        if self.context.foreground() != Some(channel) {
            return OfferOutcome::NotForeground;
        }

        forward(&manager, &envelope)
    }

    pub fn stats(&self, channel: Channel) -> OfferStatsSnapshot {
        self.gates[channel.index()].stats.snapshot(channel)
    }

    pub fn all_stats(&self) -> Vec<OfferStatsSnapshot> {
        Channel::ALL.iter().map(|&ch| self.stats(ch)).collect()
    }

    /// Subscribe a push-based producer. Every sample it yields is offered on
    /// `channel` until the returned [`Subscription`] is dropped or the
    /// producer closes its sender.
    pub fn attach(self: &Arc<Self>, channel: Channel, mut samples: mpsc::Receiver<Sample>) -> Subscription {
        let cancel = CancellationToken::new();
        let mux = Arc::clone(self);
        let task_cancel = cancel.clone();
        self.runtime.spawn(async move {
            debug!(channel = %channel, "producer attached");
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    next = samples.recv() => match next {
                        Some(sample) => {
                            mux.offer(channel, sample);
                        }
                        None => break,
                    }
                }
            }
            debug!(channel = %channel, "producer detached");
        });

        Subscription {
            channel,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }
}

fn forward(manager: &ConnectionManager, envelope: &Envelope) -> OfferOutcome {
    let text = match envelope.encode() {
        Ok(text) => text,
        Err(e) => {
            warn!(channel = %envelope.channel, error = %e, "failed to encode sample, skipping");
            return OfferOutcome::EncodeFailed;
        }
    };
    match manager.send(text) {
        SendOutcome::Sent => OfferOutcome::Forwarded,
        other => OfferOutcome::SendDropped(other),
    }
}

/// A producer attached to the multiplexer. Dropping it unsubscribes.
pub struct Subscription {
    channel: Channel,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}
