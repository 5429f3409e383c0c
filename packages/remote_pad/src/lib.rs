//! Remote Pad - realtime control channels for a handheld input device
//!
//! Streams motion and touch samples to a remote machine over one WebSocket per
//! channel. The crate owns the connection lifecycle (connect, auto-reconnect,
//! deliberate close), per-channel rate limiting, foreground gating, and the
//! JSON wire envelope. Sensor and gesture sources are external: they push
//! typed [`Sample`]s into a [`Multiplexer`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use remote_pad::{
//!     Channel, ChannelContext, MotionSample, Multiplexer, Sample, Settings, WsTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::default();
//!     let transport = Arc::new(WsTransport::new(&settings.connection));
//!     let context = Arc::new(ChannelContext::new(settings.clone(), transport));
//!
//!     context.set_host("192.168.1.42").unwrap();
//!     context.set_foreground(Some(Channel::Motion));
//!
//!     let mux = Multiplexer::new(context.clone(), &settings.stream);
//!     let outcome = mux.offer(
//!         Channel::Motion,
//!         Sample::Motion(MotionSample { x: 0.1, y: 9.7, z: 0.3 }),
//!     );
//!     println!("{outcome}");
//!
//!     context.teardown();
//! }
//! ```

mod channel;
pub mod config;
pub mod connection;
mod context;
pub mod endpoint;
mod error;
mod multiplexer;
mod sample;
pub mod transport;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod test_helpers;

pub use channel::{Channel, ParseChannelError};
pub use config::{Settings, load_config};
pub use connection::{ConnectionManager, ConnectionState, SendOutcome};
pub use context::{ChannelContext, ChannelStatus};
pub use endpoint::{Endpoint, EndpointSet, Scheme, resolve};
pub use error::{EndpointError, EnvelopeError, Error, TransportError};
pub use multiplexer::{Multiplexer, OfferOutcome, OfferStatsSnapshot, Subscription};
pub use sample::{Envelope, MotionSample, Sample, TouchAction, TouchSample};
pub use transport::WsTransport;
