//! Room membership for card games, over pluggable transports.
//!
//! This crate implements both halves of a poker-style room protocol:
//!
//! - **Server** — [`server::RoomServer`] accepts authenticated connections
//!   and mutates externally persisted room records: join, leave, quick
//!   match, and cleanup when a connection drops. Per-room serialization
//!   keeps concurrent mutations consistent; persistence and room discovery
//!   are traits ([`server::RecordStore`], [`server::RoomDirectory`]) with
//!   in-memory implementations included.
//! - **Client** — [`client::CardRoomClient`] is a handle in front of a
//!   background connection task with automatic exponential-backoff
//!   reconnection, latency sampling, and post-reconnect recovery of
//!   authoritative room state.
//!
//! Both sides speak JSON text frames over anything implementing
//! [`transport::Transport`]; a WebSocket implementation ships behind the
//! default `transport-websocket` feature.
//!
//! # Quick Start
//!
//! ```no_run
//! use card_room::{CardRoomClient, CardRoomConfig, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = WebSocketConnector::new("ws://localhost:8080");
//!     let config = CardRoomConfig::new("my-auth-token");
//!     let (client, mut events) = CardRoomClient::connect(connector, config).await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("event: {event:?}");
//!         }
//!     });
//!
//!     let outcome = client.quick_match().await?;
//!     println!(
//!         "seated in room {} (created: {})",
//!         outcome.room_state.id, outcome.created
//!     );
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod protocol;
pub mod recovery;
pub mod server;
pub mod transport;
pub mod transports;

pub use client::{CardRoomClient, CardRoomConfig, QuickMatchOutcome};
pub use error::{CardRoomError, Result};
pub use error_codes::ErrorCode;
pub use event::{CardRoomEvent, ConnectionStatus, NetworkQuality};
pub use protocol::{
    ClientMessage, PlayerEntry, RoomId, RoomState, RoomStatus, SeatStatus, ServerMessage, UserId,
};
pub use recovery::{ClientCache, RecoveryOutcome};
pub use server::RoomServer;
pub use transport::{Connect, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
