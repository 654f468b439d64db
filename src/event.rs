//! Client-local events emitted by [`CardRoomClient`](crate::client::CardRoomClient).
//!
//! Events are delivered on the bounded channel returned from
//! [`CardRoomClient::connect`](crate::client::CardRoomClient::connect). None
//! of these travel on the wire; they are the only externally observable side
//! effects of the connection state machine and the recovery coordinator.

use std::time::Duration;

use crate::protocol::{PlayerEntry, RoomId, RoomState, UserId};

/// Connection lifecycle states of the client state machine.
///
/// `Error` is terminal until [`retry()`](crate::client::CardRoomClient::retry)
/// is called; `Disconnected` is terminal for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Coarse link-quality bucket derived from ping round-trip time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    /// Round trip below 100 ms.
    Excellent,
    /// Round trip below 300 ms.
    Good,
    /// Round trip below 1 s.
    Poor,
    /// Round trip of 1 s or more.
    Offline,
}

impl NetworkQuality {
    /// Buckets a measured round-trip time.
    pub fn from_rtt(rtt: Duration) -> Self {
        if rtt < Duration::from_millis(100) {
            Self::Excellent
        } else if rtt < Duration::from_millis(300) {
            Self::Good
        } else if rtt < Duration::from_millis(1000) {
            Self::Poor
        } else {
            Self::Offline
        }
    }
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum CardRoomEvent {
    /// The connection state machine transitioned. Emitted on every
    /// transition, including the initial `Connecting`.
    ConnectionStatusChanged { status: ConnectionStatus },
    /// A latency probe completed while connected.
    NetworkQualityUpdate {
        quality: NetworkQuality,
        rtt_ms: u64,
    },
    /// Broadcast from the server: another player joined the current room.
    PlayerJoined {
        player: PlayerEntry,
        current_player_count: usize,
    },
    /// Broadcast from the server: another player left the current room.
    PlayerLeft {
        player_id: UserId,
        username: String,
        current_player_count: usize,
        new_owner: Option<UserId>,
    },
    /// Post-reconnect recovery found the server's idea of our room differed
    /// from the local cache; the cache has been overwritten with the
    /// authoritative state carried here.
    Reconnected {
        room_id: RoomId,
        room_state: Box<RoomState>,
    },
    /// Post-reconnect recovery could not query authoritative state. The
    /// local cache was left untouched — the presentation layer decides what
    /// to do.
    StateRecoveryFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_buckets_at_thresholds() {
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(0)),
            NetworkQuality::Excellent
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(99)),
            NetworkQuality::Excellent
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(100)),
            NetworkQuality::Good
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(299)),
            NetworkQuality::Good
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(300)),
            NetworkQuality::Poor
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(999)),
            NetworkQuality::Poor
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_millis(1000)),
            NetworkQuality::Offline
        );
        assert_eq!(
            NetworkQuality::from_rtt(Duration::from_secs(5)),
            NetworkQuality::Offline
        );
    }
}
