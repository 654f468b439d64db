//! Wire types for the card-room membership protocol.
//!
//! Every message is a JSON text frame using adjacent tagging
//! (`{"type": ..., "data": ...}`). Request/ack calls correlate through a
//! client-assigned `request_id`; broadcasts carry no id. The canonical
//! [`RoomState`] record is what the server persists per room — clients only
//! ever receive snapshots of it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for users.
pub type UserId = Uuid;

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Unique identifier for one live server-side connection.
pub type ConnectionId = Uuid;

/// Client-assigned id correlating a request with its ack.
///
/// Monotonically increasing per client; uniqueness only matters within one
/// connection's lifetime.
pub type RequestId = u64;

// ── Defaults ────────────────────────────────────────────────────────

/// Starting stake handed to every player at join time.
pub const DEFAULT_CHIPS: u64 = 1_000;

/// Capacity of rooms synthesized by quick match.
pub const DEFAULT_MAX_PLAYERS: usize = 6;

/// Small blind of rooms synthesized by quick match.
pub const DEFAULT_SMALL_BLIND: u64 = 10;

/// Big blind of rooms synthesized by quick match.
pub const DEFAULT_BIG_BLIND: u64 = 20;

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Seats are open; quick match considers the room a candidate.
    #[default]
    Waiting,
    /// A hand is in progress.
    Playing,
    /// The table has been closed out.
    Ended,
}

/// Seating status of one player. Game-phase statuses live in the game
/// engine, not here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    #[default]
    Active,
    SittingOut,
}

// ── Structs ─────────────────────────────────────────────────────────

/// One seated player inside a [`RoomState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntry {
    pub id: UserId,
    pub username: String,
    /// Stake at join time ([`DEFAULT_CHIPS`]).
    pub chips: u64,
    /// 0-based seat index; contiguous across the player list.
    pub position: usize,
    pub is_owner: bool,
    pub status: SeatStatus,
}

/// The canonical, shared record describing one room's membership and
/// configuration.
///
/// Persisted by the server as one JSON document per room. The password hash
/// never appears here — only [`has_password`](RoomState::has_password); the
/// secret itself lives in the room directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomState {
    pub id: RoomId,
    pub owner_id: UserId,
    /// Seating order is meaningful; entries are kept sorted by `position`.
    pub players: Vec<PlayerEntry>,
    pub status: RoomStatus,
    pub max_players: usize,
    /// Derived cache of `players.len()`, recomputed on every mutation.
    pub current_player_count: usize,
    pub has_password: bool,
    pub small_blind: u64,
    pub big_blind: u64,
    /// Unix milliseconds of the last successful mutation.
    pub last_activity: i64,
}

impl RoomState {
    /// Returns the entry for `user`, if seated.
    pub fn player(&self, user: UserId) -> Option<&PlayerEntry> {
        self.players.iter().find(|p| p.id == user)
    }

    /// Returns `true` if `user` is seated in this room.
    pub fn contains_player(&self, user: UserId) -> bool {
        self.player(user).is_some()
    }

    /// Returns `true` if no seat is left.
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    /// Validates the record's structural invariants.
    ///
    /// Checked by tests after every mutation; the mutation service maintains
    /// these by construction.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.current_player_count != self.players.len() {
            return Err(format!(
                "current_player_count {} != players.len() {}",
                self.current_player_count,
                self.players.len()
            ));
        }
        if self.players.len() > self.max_players {
            return Err(format!(
                "players.len() {} exceeds max_players {}",
                self.players.len(),
                self.max_players
            ));
        }
        if !self.players.is_empty() {
            let owners: Vec<&PlayerEntry> =
                self.players.iter().filter(|p| p.is_owner).collect();
            match owners.as_slice() {
                [owner] if owner.id == self.owner_id => {}
                [owner] => {
                    return Err(format!(
                        "owner flag on {} but owner_id is {}",
                        owner.id, self.owner_id
                    ));
                }
                _ => return Err(format!("expected exactly one owner, found {}", owners.len())),
            }
        }
        let mut seen_positions: Vec<usize> =
            self.players.iter().map(|p| p.position).collect();
        seen_positions.sort_unstable();
        for (expected, actual) in seen_positions.iter().enumerate() {
            if expected != *actual {
                return Err(format!(
                    "positions are not a contiguous 0..{} permutation: {:?}",
                    self.players.len(),
                    seen_positions
                ));
            }
        }
        let mut ids: Vec<UserId> = self.players.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.players.len() {
            return Err("duplicate user id in players".into());
        }
        Ok(())
    }
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload for the `RoomJoined` ack. Boxed in [`ServerMessage`] to reduce
/// enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    pub request_id: RequestId,
    /// Full post-mutation room snapshot.
    pub room_state: RoomState,
}

/// Payload for the `QuickMatched` ack. Boxed in [`ServerMessage`] to reduce
/// enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickMatchedPayload {
    pub request_id: RequestId,
    pub room_state: RoomState,
    /// `true` when no candidate room existed and a new one was synthesized.
    pub created: bool,
}

/// Payload for the `CurrentRoom` ack. Boxed in [`ServerMessage`] to reduce
/// enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRoomPayload {
    pub request_id: RequestId,
    /// The room this connection is bound to, derived server-side from the
    /// session registry — never from anything the client asserted.
    pub room_id: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_state: Option<RoomState>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Handshake (MUST be the first message on a connection). The token is
    /// opaque to this crate; an external authenticator resolves it to a
    /// `(user_id, username)` pair.
    Authenticate { token: String },
    /// Join an existing room, optionally supplying its password.
    JoinRoom {
        request_id: RequestId,
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Leave the current room (resolved from the session binding).
    LeaveRoom { request_id: RequestId },
    /// Join the first eligible open room, or create one.
    QuickMatch { request_id: RequestId },
    /// Ask the server which room this session is bound to.
    GetCurrentRoom { request_id: RequestId },
    /// Round-trip probe used for latency sampling.
    Ping { request_id: RequestId },
}

impl ClientMessage {
    /// Returns the correlation id, if this message expects an ack.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Authenticate { .. } => None,
            Self::JoinRoom { request_id, .. }
            | Self::LeaveRoom { request_id }
            | Self::QuickMatch { request_id }
            | Self::GetCurrentRoom { request_id }
            | Self::Ping { request_id } => Some(*request_id),
        }
    }
}

/// Message types sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Handshake accepted; echoes the authenticated identity.
    Authenticated { user_id: UserId, username: String },
    /// Handshake rejected. The connection is closed afterwards.
    AuthenticationError {
        error: String,
        error_code: ErrorCode,
    },
    /// Ack: successfully joined a room (boxed to reduce enum size).
    RoomJoined(Box<RoomJoinedPayload>),
    /// Ack: quick match joined or created a room (boxed to reduce enum size).
    QuickMatched(Box<QuickMatchedPayload>),
    /// Ack: successfully left the room.
    RoomLeft { request_id: RequestId },
    /// Ack: authoritative answer to `GetCurrentRoom` (boxed to reduce enum size).
    CurrentRoom(Box<CurrentRoomPayload>),
    /// Ack: reply to a latency probe. `timestamp` is the server clock in unix
    /// milliseconds and is informational only — round-trip time is measured
    /// by the caller.
    Pong { request_id: RequestId, timestamp: i64 },
    /// Ack: the correlated request failed. Validation failures carry their
    /// specific code; infrastructure failures always collapse to
    /// [`ErrorCode::InternalError`] with a generic message.
    RequestFailed {
        request_id: RequestId,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Broadcast: another player joined the room.
    PlayerJoined {
        player: PlayerEntry,
        current_player_count: usize,
    },
    /// Broadcast: another player left the room.
    PlayerLeft {
        player_id: UserId,
        username: String,
        current_player_count: usize,
        /// Set when the departure transferred ownership.
        #[serde(skip_serializing_if = "Option::is_none")]
        new_owner: Option<UserId>,
    },
}

impl ServerMessage {
    /// Returns the correlation id, if this message is an ack.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::RoomJoined(p) => Some(p.request_id),
            Self::QuickMatched(p) => Some(p.request_id),
            Self::CurrentRoom(p) => Some(p.request_id),
            Self::RoomLeft { request_id }
            | Self::Pong { request_id, .. }
            | Self::RequestFailed { request_id, .. } => Some(*request_id),
            Self::Authenticated { .. }
            | Self::AuthenticationError { .. }
            | Self::PlayerJoined { .. }
            | Self::PlayerLeft { .. } => None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn seat(n: u128, position: usize, is_owner: bool) -> PlayerEntry {
        PlayerEntry {
            id: Uuid::from_u128(n),
            username: format!("player{n}"),
            chips: DEFAULT_CHIPS,
            position,
            is_owner,
            status: SeatStatus::Active,
        }
    }

    fn two_seat_room() -> RoomState {
        RoomState {
            id: Uuid::from_u128(1),
            owner_id: Uuid::from_u128(10),
            players: vec![seat(10, 0, true), seat(11, 1, false)],
            status: RoomStatus::Waiting,
            max_players: 6,
            current_player_count: 2,
            has_password: false,
            small_blind: DEFAULT_SMALL_BLIND,
            big_blind: DEFAULT_BIG_BLIND,
            last_activity: 0,
        }
    }

    #[test]
    fn invariants_hold_for_well_formed_room() {
        two_seat_room().check_invariants().unwrap();
    }

    #[test]
    fn invariants_reject_stale_count() {
        let mut room = two_seat_room();
        room.current_player_count = 3;
        assert!(room.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_two_owners() {
        let mut room = two_seat_room();
        room.players[1].is_owner = true;
        assert!(room.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_owner_id_mismatch() {
        let mut room = two_seat_room();
        room.owner_id = Uuid::from_u128(99);
        assert!(room.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_position_gap() {
        let mut room = two_seat_room();
        room.players[1].position = 2;
        assert!(room.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_duplicate_user() {
        let mut room = two_seat_room();
        room.players[1].id = room.players[0].id;
        assert!(room.check_invariants().is_err());
    }

    #[test]
    fn invariants_allow_empty_room() {
        let mut room = two_seat_room();
        room.players.clear();
        room.current_player_count = 0;
        room.check_invariants().unwrap();
    }

    #[test]
    fn client_message_request_ids() {
        let msg = ClientMessage::JoinRoom {
            request_id: 7,
            room_id: Uuid::nil(),
            password: None,
        };
        assert_eq!(msg.request_id(), Some(7));
        let auth = ClientMessage::Authenticate { token: "t".into() };
        assert_eq!(auth.request_id(), None);
    }

    #[test]
    fn server_message_request_ids() {
        let msg = ServerMessage::Pong {
            request_id: 3,
            timestamp: 0,
        };
        assert_eq!(msg.request_id(), Some(3));
        let bcast = ServerMessage::PlayerLeft {
            player_id: Uuid::nil(),
            username: "x".into(),
            current_player_count: 0,
            new_owner: None,
        };
        assert_eq!(bcast.request_id(), None);
    }
}
