//! Error codes for structured error handling on the room-membership wire.
//!
//! These codes are shared by the client and the server and serialize using
//! `SCREAMING_SNAKE_CASE` (e.g., `"ROOM_NOT_FOUND"`), so non-Rust peers can
//! match on them without parsing English prose.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes carried by failed acks.
///
/// Each variant corresponds to a specific failure condition. Validation
/// failures map one-to-one; every infrastructure failure collapses to
/// [`InternalError`](ErrorCode::InternalError) — internal detail never
/// crosses the wire.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Handshake errors
    AuthenticationFailed,

    // Room membership errors
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    InvalidPassword,
    NotInRoom,
    PlayerNotInRoom,

    // Server errors
    InternalError,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => {
                "The handshake token was rejected. Obtain a fresh token and reconnect."
            }
            Self::RoomNotFound => {
                "The requested room could not be found. It may have emptied out and been deleted."
            }
            Self::RoomFull => {
                "The room has reached its maximum player capacity. Try a different room or quick match."
            }
            Self::AlreadyInRoom => {
                "You are already seated in this room."
            }
            Self::InvalidPassword => {
                "The room password is missing or does not match."
            }
            Self::NotInRoom => {
                "You are not currently in any room. Join a room before performing this action."
            }
            Self::PlayerNotInRoom => {
                "Your session points at a room that has no seat for you. Rejoin the room."
            }
            Self::InternalError => {
                "An internal server error occurred. Please try again or contact support if the issue persists."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
