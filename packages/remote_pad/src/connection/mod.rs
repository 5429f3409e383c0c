//! Per-endpoint connection lifecycle.
//!
//! - `machine`: pure `(state, event) -> effects` transition function
//! - `manager`: ConnectionManager applying those effects to a transport

pub mod machine;
mod manager;

pub use machine::ConnectionState;
pub use manager::{ConnectionManager, SendOutcome};
