//! Server-side room membership: persistence, directory, sessions, and the
//! mutation service, plus a per-connection protocol loop.
//!
//! The pieces compose as follows:
//!
//! - [`store::RecordStore`] — pluggable key/value persistence for the
//!   canonical [`RoomState`](crate::protocol::RoomState) documents.
//! - [`directory::RoomDirectory`] — room discovery and password
//!   verification, kept separate so secrets never enter the shared record.
//! - [`session::SessionRegistry`] — live connections, their identities, and
//!   their room bindings.
//! - [`service::RoomService`] — the membership mutations (join, leave, quick
//!   match, disconnect cleanup), serialized per room.
//! - [`connection::RoomServer`] — drives one
//!   [`Transport`](crate::transport::Transport) through handshake, dispatch,
//!   and cleanup.

pub mod connection;
pub mod directory;
pub mod service;
pub mod session;
pub mod store;

pub use connection::{Authenticator, MemoryAuthenticator, RoomServer};
pub use directory::{CreateRoomParams, DirectoryRecord, MemoryDirectory, RoomDirectory};
pub use service::{RoomError, RoomService};
pub use session::{Identity, SessionRegistry};
pub use store::{MemoryStore, RecordStore, StoreError};

/// Current server clock as unix milliseconds. Saturates at zero if the
/// system clock is before the epoch.
pub(crate) fn unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
