//! Live connection registry.
//!
//! One [`Session`] per authenticated transport. The room binding recorded
//! here is the server's source of truth for "which room is this connection
//! in" — membership requests never trust a client-asserted room id except
//! for the explicit join target.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, RoomId, ServerMessage, UserId};

/// The authenticated identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug)]
struct Session {
    identity: Identity,
    room_id: Option<RoomId>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of live, authenticated connections.
///
/// Acks and broadcasts for a connection both go through its registered
/// sender, so each client observes its own messages in the order the server
/// produced them.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly authenticated connection.
    pub fn register(
        &self,
        conn: ConnectionId,
        identity: Identity,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) {
        self.sessions.insert(
            conn,
            Session {
                identity,
                room_id: None,
                sender,
            },
        );
    }

    /// Remove a connection. Returns the room it was bound to, if any.
    pub fn unregister(&self, conn: ConnectionId) -> Option<RoomId> {
        self.sessions.remove(&conn).and_then(|(_, s)| s.room_id)
    }

    /// The identity behind a connection.
    pub fn identity(&self, conn: ConnectionId) -> Option<Identity> {
        self.sessions.get(&conn).map(|s| s.identity.clone())
    }

    /// The room a connection is currently bound to.
    pub fn current_room(&self, conn: ConnectionId) -> Option<RoomId> {
        self.sessions.get(&conn).and_then(|s| s.room_id)
    }

    /// Bind a connection to a room after a successful join.
    pub fn bind_room(&self, conn: ConnectionId, room_id: RoomId) {
        if let Some(mut session) = self.sessions.get_mut(&conn) {
            session.room_id = Some(room_id);
        }
    }

    /// Clear a connection's room binding after it leaves.
    pub fn clear_room(&self, conn: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&conn) {
            session.room_id = None;
        }
    }

    /// Queue a message for one connection. Returns `false` if the connection
    /// is gone or its outbound channel is closed.
    pub fn send_to(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        match self.sessions.get(&conn) {
            Some(session) => session.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Queue `message` for every connection bound to `room_id`, except
    /// `exclude`. Returns the number of connections reached.
    pub fn broadcast_to_room(
        &self,
        room_id: RoomId,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut reached = 0;
        for session in self.sessions.iter() {
            if session.value().room_id != Some(room_id) {
                continue;
            }
            if exclude == Some(*session.key()) {
                continue;
            }
            if session.value().sender.send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }
}
