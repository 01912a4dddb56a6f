//! Peer signaling with acknowledged delivery.
//!
//! [`SignalingClient`] sends `request`, `response`, `token` and `ping`
//! frames; the server acknowledges each one. Requests also wait for the
//! peer's paired response. See [`message`] for the wire format.

mod client;
mod correlator;
pub mod message;

pub use client::SignalingClient;
pub use message::{PeerRequest, RejectReason};
