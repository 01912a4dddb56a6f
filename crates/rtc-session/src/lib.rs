//! # rtc-session
//!
//! Resilient session layer for real-time signaling and RPC clients.
//!
//! The crate keeps one logical connection to a signaling/RPC server alive
//! across socket drops and hides the drops from callers:
//!
//! - **Correlated calls**: requests carry a unique id and resolve with the
//!   matching response, whatever order responses arrive in.
//! - **Reconnection**: a lost socket is reopened with bounded, jittered
//!   backoff; calls in flight are replayed with their original id and
//!   subscriptions are restored from the last delivered version.
//! - **Ordered events**: versioned stream frames are delivered in strict
//!   version order without gaps or duplicates; a gap that outlives its
//!   lifetime triggers a resync.
//! - **Signaling**: acknowledged peer requests with a connectivity
//!   heartbeat.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtc_session::{SessionClient, SessionConfig, WebSocketConnector};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = WebSocketConnector::new("wss://rtc.example.com/ws");
//!     let client = SessionClient::connect(SessionConfig::default(), connector, "token").await?;
//!
//!     let room = client.call("join_room", json!({"room": "lobby"})).await?;
//!     println!("joined: {room}");
//!
//!     let mut events = client.subscribe("lobby", 0).await?;
//!     while let Some(frame) = events.recv().await {
//!         println!("v{}: {}", frame.version, frame.payload);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
mod link;
pub mod listener;
pub mod ordering;
pub mod pending;
pub mod protocol;
pub mod signaling;
pub mod socket;
pub mod subscription;
pub mod types;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{CorrelatedChannel, InFlightCall, Push};
pub use client::SessionClient;
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use listener::{ListenerId, Listeners};
pub use ordering::{EventOrderingBuffer, ResyncCallback};
pub use protocol::{Inbound, JsonRpcProtocol, RpcCall, RpcError, RpcProtocol};
pub use signaling::{PeerRequest, RejectReason, SignalingClient};
#[cfg(feature = "websocket")]
pub use socket::WebSocketConnector;
pub use socket::{Connector, SocketMessage, SocketReader, SocketWriter};
pub use subscription::EventSubscription;
pub use types::{ConnectionState, EventFrame, Notification, RequestId, StreamId};
