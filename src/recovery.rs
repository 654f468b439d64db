//! Post-reconnect state reconciliation.
//!
//! The client keeps an advisory [`ClientCache`] mirroring what it believes
//! about its room membership. After every successful reconnect the client
//! queries the server for the authoritative answer and feeds it through
//! [`reconcile`]; the cache never wins an argument with the server.

use crate::protocol::{RoomId, RoomState, RoomStatus};

/// Client-side mirror of room membership. May be stale at any time; it is
/// overwritten wholesale during recovery.
#[derive(Debug, Clone, Default)]
pub struct ClientCache {
    pub current_room_id: Option<RoomId>,
    /// Last known room snapshot, kept roughly current from acks and
    /// broadcasts between recoveries.
    pub current_room: Option<RoomState>,
    pub is_in_game: bool,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached membership with a fresh server snapshot.
    pub fn apply_room(&mut self, room: &RoomState) {
        self.current_room_id = Some(room.id);
        self.is_in_game = room.status == RoomStatus::Playing;
        self.current_room = Some(room.clone());
    }

    /// Drops all cached membership state.
    pub fn clear_room(&mut self) {
        self.current_room_id = None;
        self.current_room = None;
        self.is_in_game = false;
    }
}

/// What [`reconcile`] did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Server and cache agreed; cached detail fields were refreshed.
    InSync,
    /// Server reported a room the cache did not know about (or knew a
    /// different one); the cache was overwritten.
    Rejoined(RoomId),
    /// Server reported no room while the cache believed otherwise; the cache
    /// was cleared.
    Cleared,
}

/// Reconciles the local cache against the server's authoritative answer.
///
/// Server state always wins. A `None` answer means "this user is in no
/// room" — it is authoritative too, not an error (transport failures never
/// reach this function).
pub fn reconcile(cache: &mut ClientCache, authoritative: Option<&RoomState>) -> RecoveryOutcome {
    match authoritative {
        Some(room) if cache.current_room_id == Some(room.id) => {
            cache.apply_room(room);
            RecoveryOutcome::InSync
        }
        Some(room) => {
            cache.apply_room(room);
            RecoveryOutcome::Rejoined(room.id)
        }
        None if cache.current_room_id.is_some() || cache.is_in_game => {
            cache.clear_room();
            RecoveryOutcome::Cleared
        }
        None => RecoveryOutcome::InSync,
    }
}
