//! Room membership mutations.
//!
//! All writes to a room record flow through [`RoomService`], which holds a
//! per-room async mutex so each room sees at most one writer at a time.
//! Reads for different rooms proceed in parallel; two mutations of the same
//! room serialize on its lock, so every read-modify-write cycle observes the
//! previous one's result.
//!
//! Validation failures carry specific [`ErrorCode`]s back to the caller.
//! Infrastructure failures (store outage, corrupt record, registry gaps) all
//! display as a generic internal error; their detail stays in server logs.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error_codes::ErrorCode;
use crate::protocol::{
    ConnectionId, PlayerEntry, RoomId, RoomState, RoomStatus, SeatStatus, ServerMessage,
    DEFAULT_BIG_BLIND, DEFAULT_CHIPS, DEFAULT_MAX_PLAYERS, DEFAULT_SMALL_BLIND,
};

use super::directory::{CreateRoomParams, RoomDirectory};
use super::session::SessionRegistry;
use super::store::{RecordStore, StoreError};
use super::unix_millis;

/// Store key for a room record.
pub(crate) fn room_key(room_id: RoomId) -> String {
    format!("room:{room_id}")
}

/// Failures of a membership mutation.
///
/// The first group is validation failures; their display strings and
/// [`error_code`](RoomError::error_code)s go to the client verbatim. The
/// second group is infrastructure failures; they all display as
/// `"Internal server error"` and map to [`ErrorCode::InternalError`].
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Room is full")]
    RoomFull,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Not in a room")]
    NotInRoom,

    #[error("No seat in the current room")]
    PlayerNotInRoom,

    #[error("Internal server error")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    CorruptRecord(#[from] serde_json::Error),

    #[error("Internal server error")]
    RecordMissing(RoomId),

    #[error("Internal server error")]
    SessionMissing(ConnectionId),
}

impl RoomError {
    /// Structured code for the wire.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound => ErrorCode::RoomNotFound,
            Self::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            Self::RoomFull => ErrorCode::RoomFull,
            Self::InvalidPassword => ErrorCode::InvalidPassword,
            Self::NotInRoom => ErrorCode::NotInRoom,
            Self::PlayerNotInRoom => ErrorCode::PlayerNotInRoom,
            Self::Store(_)
            | Self::CorruptRecord(_)
            | Self::RecordMissing(_)
            | Self::SessionMissing(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this failure is an infrastructure problem worth logging at
    /// error level (validation failures are routine).
    pub fn is_internal(&self) -> bool {
        self.error_code() == ErrorCode::InternalError
    }
}

/// Serialized room membership mutations over pluggable persistence.
pub struct RoomService {
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn RoomDirectory>,
    sessions: Arc<SessionRegistry>,
    // One lock per live room; entries are dropped when the room empties out.
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl RoomService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<dyn RoomDirectory>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            store,
            directory,
            sessions,
            room_locks: DashMap::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn lock_for(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        let entry = self
            .room_locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }

    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomState>, RoomError> {
        match self.store.get(&room_key(room_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn persist_room(&self, room: &RoomState) -> Result<(), RoomError> {
        let json = serde_json::to_string(room)?;
        self.store.set(&room_key(room.id), json).await?;
        Ok(())
    }

    /// Seat the connection's user in `room_id`.
    ///
    /// On success the session is bound to the room, the updated record is
    /// persisted, and a `PlayerJoined` broadcast goes to every other member.
    pub async fn join(
        &self,
        conn: ConnectionId,
        room_id: RoomId,
        password: Option<&str>,
    ) -> Result<RoomState, RoomError> {
        let identity = self
            .sessions
            .identity(conn)
            .ok_or(RoomError::SessionMissing(conn))?;

        // Cheap existence check before taking the room lock.
        if self.directory.find_room(room_id).await?.is_none() {
            return Err(RoomError::RoomNotFound);
        }

        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self
            .load_room(room_id)
            .await?
            .ok_or(RoomError::RecordMissing(room_id))?;

        if room.contains_player(identity.user_id) {
            return Err(RoomError::AlreadyInRoom);
        }
        if room.is_full() {
            return Err(RoomError::RoomFull);
        }
        if room.has_password && !self.directory.verify_password(room_id, password).await? {
            return Err(RoomError::InvalidPassword);
        }

        let entry = PlayerEntry {
            id: identity.user_id,
            username: identity.username.clone(),
            chips: DEFAULT_CHIPS,
            position: room.players.len(),
            is_owner: false,
            status: SeatStatus::Active,
        };
        room.players.push(entry.clone());
        room.current_player_count = room.players.len();
        room.last_activity = unix_millis();

        self.persist_room(&room).await?;
        self.sessions.bind_room(conn, room_id);

        let reached = self.sessions.broadcast_to_room(
            room_id,
            &ServerMessage::PlayerJoined {
                player: entry,
                current_player_count: room.current_player_count,
            },
            Some(conn),
        );
        tracing::info!(
            user_id = %identity.user_id,
            %room_id,
            players = room.current_player_count,
            notified = reached,
            "player joined room"
        );

        Ok(room)
    }

    /// Remove the connection's user from its bound room.
    ///
    /// Transfers ownership to the lowest-position survivor when the owner
    /// leaves, deletes the room when the last player leaves, and broadcasts
    /// `PlayerLeft` to the remaining members.
    pub async fn leave(&self, conn: ConnectionId) -> Result<(), RoomError> {
        let identity = self
            .sessions
            .identity(conn)
            .ok_or(RoomError::SessionMissing(conn))?;
        let room_id = self.sessions.current_room(conn).ok_or(RoomError::NotInRoom)?;

        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;

        let mut room = self
            .load_room(room_id)
            .await?
            .ok_or(RoomError::RecordMissing(room_id))?;

        let Some(index) = room.players.iter().position(|p| p.id == identity.user_id) else {
            // Stale binding: the record has no seat for this user.
            self.sessions.clear_room(conn);
            return Err(RoomError::PlayerNotInRoom);
        };

        let removed = room.players.remove(index);
        let mut new_owner = None;

        if removed.is_owner {
            if let Some(heir) = room.players.iter_mut().min_by_key(|p| p.position) {
                heir.is_owner = true;
                room.owner_id = heir.id;
                new_owner = Some(heir.id);
            }
        }

        // Close the seating gap; vec order is position order.
        for (position, player) in room.players.iter_mut().enumerate() {
            player.position = position;
        }
        room.current_player_count = room.players.len();
        room.last_activity = unix_millis();

        if room.players.is_empty() {
            self.store.delete(&room_key(room_id)).await?;
            self.directory.remove_room(room_id).await?;
            self.room_locks.remove(&room_id);
            tracing::info!(%room_id, "room emptied out and was deleted");
        } else {
            self.persist_room(&room).await?;
        }

        self.sessions.clear_room(conn);

        let reached = self.sessions.broadcast_to_room(
            room_id,
            &ServerMessage::PlayerLeft {
                player_id: removed.id,
                username: removed.username,
                current_player_count: room.current_player_count,
                new_owner,
            },
            Some(conn),
        );
        tracing::info!(
            user_id = %identity.user_id,
            %room_id,
            players = room.current_player_count,
            notified = reached,
            ?new_owner,
            "player left room"
        );

        Ok(())
    }

    /// Seat the user in the first eligible open room, creating a fresh one
    /// when no candidate exists.
    ///
    /// A candidate room is `Waiting`, has a free seat, has no password, and
    /// does not already seat this user. Returns the resulting room snapshot
    /// and whether a new room was created.
    pub async fn quick_match(&self, conn: ConnectionId) -> Result<(RoomState, bool), RoomError> {
        let identity = self
            .sessions
            .identity(conn)
            .ok_or(RoomError::SessionMissing(conn))?;

        let keys = self.store.list_keys("room:").await?;
        for key in keys {
            let Some(json) = self.store.get(&key).await? else {
                // Room deleted between list and get; skip it.
                continue;
            };
            let candidate: RoomState = serde_json::from_str(&json)?;

            let eligible = candidate.status == RoomStatus::Waiting
                && !candidate.is_full()
                && !candidate.has_password
                && !candidate.contains_player(identity.user_id);
            if !eligible {
                continue;
            }

            // The join re-validates under the room lock, so a race that
            // fills the room between the scan and the join surfaces as a
            // regular join failure.
            let room = self.join(conn, candidate.id, None).await?;
            return Ok((room, false));
        }

        // No candidate; synthesize a room with this user as owner.
        let room_id = self
            .directory
            .create_room(CreateRoomParams {
                owner_id: identity.user_id,
                max_players: DEFAULT_MAX_PLAYERS,
                small_blind: DEFAULT_SMALL_BLIND,
                big_blind: DEFAULT_BIG_BLIND,
                password: None,
            })
            .await?;

        let room = RoomState {
            id: room_id,
            owner_id: identity.user_id,
            players: vec![PlayerEntry {
                id: identity.user_id,
                username: identity.username.clone(),
                chips: DEFAULT_CHIPS,
                position: 0,
                is_owner: true,
                status: SeatStatus::Active,
            }],
            status: RoomStatus::Waiting,
            max_players: DEFAULT_MAX_PLAYERS,
            current_player_count: 1,
            has_password: false,
            small_blind: DEFAULT_SMALL_BLIND,
            big_blind: DEFAULT_BIG_BLIND,
            last_activity: unix_millis(),
        };

        let lock = self.lock_for(room_id);
        let _guard = lock.lock().await;
        self.persist_room(&room).await?;
        self.sessions.bind_room(conn, room_id);

        tracing::info!(
            user_id = %identity.user_id,
            %room_id,
            "quick match created a new room"
        );

        Ok((room, true))
    }

    /// Authoritative answer for `GetCurrentRoom`.
    ///
    /// Resolved purely from the session binding. A binding that points at a
    /// vanished record is cleared and reported as "no room".
    pub async fn current_room(
        &self,
        conn: ConnectionId,
    ) -> Result<(Option<RoomId>, Option<RoomState>), RoomError> {
        let Some(room_id) = self.sessions.current_room(conn) else {
            return Ok((None, None));
        };
        match self.load_room(room_id).await? {
            Some(room) => Ok((Some(room_id), Some(room))),
            None => {
                tracing::warn!(%room_id, "session bound to a missing room record, clearing");
                self.sessions.clear_room(conn);
                Ok((None, None))
            }
        }
    }

    /// Remove the user from their room when the connection drops.
    ///
    /// Runs on every disconnect; errors are logged, never propagated — the
    /// connection is already gone and has nobody to report to.
    pub async fn disconnect_cleanup(&self, conn: ConnectionId) {
        if self.sessions.current_room(conn).is_none() {
            return;
        }
        if let Err(err) = self.leave(conn).await {
            tracing::warn!(%conn, %err, "disconnect cleanup failed to remove player");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::server::directory::{DirectoryRecord, MemoryDirectory};
    use crate::server::session::Identity;
    use crate::server::store::MemoryStore;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        directory: Arc<MemoryDirectory>,
        sessions: Arc<SessionRegistry>,
        service: RoomService,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let directory = Arc::new(MemoryDirectory::new());
            let sessions = Arc::new(SessionRegistry::new());
            let store_dyn: Arc<dyn RecordStore> = store.clone();
            let directory_dyn: Arc<dyn RoomDirectory> = directory.clone();
            let service = RoomService::new(store_dyn, directory_dyn, Arc::clone(&sessions));
            Self {
                store,
                directory,
                sessions,
                service,
            }
        }

        fn connect(&self, n: u128) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
            let conn = Uuid::from_u128(9000 + n);
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions.register(
                conn,
                Identity {
                    user_id: Uuid::from_u128(n),
                    username: format!("user{n}"),
                },
                tx,
            );
            (conn, rx)
        }

        /// Seed a room with one owner seat into both directory and store.
        async fn seed_room(&self, owner: u128, password: Option<&str>) -> RoomId {
            let room_id = Uuid::new_v4();
            let owner_id = Uuid::from_u128(owner);
            self.directory.seed(
                DirectoryRecord {
                    room_id,
                    owner_id,
                    status: RoomStatus::Waiting,
                    has_password: password.is_some(),
                },
                password.map(String::from),
            );
            let room = RoomState {
                id: room_id,
                owner_id,
                players: vec![PlayerEntry {
                    id: owner_id,
                    username: format!("user{owner}"),
                    chips: DEFAULT_CHIPS,
                    position: 0,
                    is_owner: true,
                    status: SeatStatus::Active,
                }],
                status: RoomStatus::Waiting,
                max_players: DEFAULT_MAX_PLAYERS,
                current_player_count: 1,
                has_password: password.is_some(),
                small_blind: DEFAULT_SMALL_BLIND,
                big_blind: DEFAULT_BIG_BLIND,
                last_activity: 0,
            };
            self.store
                .set(&room_key(room_id), serde_json::to_string(&room).unwrap())
                .await
                .unwrap();
            room_id
        }

        async fn room(&self, room_id: RoomId) -> RoomState {
            let json = self.store.get(&room_key(room_id)).await.unwrap().unwrap();
            serde_json::from_str(&json).unwrap()
        }
    }

    #[tokio::test]
    async fn join_seats_player_and_broadcasts() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (owner_conn, mut owner_rx) = h.connect(1);
        h.sessions.bind_room(owner_conn, room_id);
        let (conn, _rx) = h.connect(2);

        let room = h.service.join(conn, room_id, None).await.unwrap();
        room.check_invariants().unwrap();
        assert_eq!(room.current_player_count, 2);
        assert_eq!(room.players[1].id, Uuid::from_u128(2));
        assert_eq!(room.players[1].position, 1);
        assert_eq!(room.players[1].chips, DEFAULT_CHIPS);
        assert!(!room.players[1].is_owner);
        assert_eq!(h.sessions.current_room(conn), Some(room_id));

        match owner_rx.try_recv().unwrap() {
            ServerMessage::PlayerJoined {
                player,
                current_player_count,
            } => {
                assert_eq!(player.id, Uuid::from_u128(2));
                assert_eq!(current_player_count, 2);
            }
            other => panic!("expected PlayerJoined, got {other:?}"),
        }

        // Persisted record matches the returned snapshot.
        assert_eq!(h.room(room_id).await, room);
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let h = Harness::new();
        let (conn, _rx) = h.connect(1);
        let err = h.service.join(conn, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, RoomError::RoomNotFound));
        assert_eq!(err.error_code(), ErrorCode::RoomNotFound);
    }

    #[tokio::test]
    async fn join_twice_fails_with_already_in_room() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(2);

        h.service.join(conn, room_id, None).await.unwrap();
        let err = h.service.join(conn, room_id, None).await.unwrap_err();
        assert!(matches!(err, RoomError::AlreadyInRoom));
    }

    #[tokio::test]
    async fn join_full_room_fails() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        for n in 2..=(DEFAULT_MAX_PLAYERS as u128) {
            let (conn, _rx) = h.connect(n);
            h.service.join(conn, room_id, None).await.unwrap();
        }

        let (conn, _rx) = h.connect(99);
        let err = h.service.join(conn, room_id, None).await.unwrap_err();
        assert!(matches!(err, RoomError::RoomFull));
        h.room(room_id).await.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn join_protected_room_checks_password() {
        let h = Harness::new();
        let room_id = h.seed_room(1, Some("sesame")).await;
        let (conn, _rx) = h.connect(2);

        let err = h.service.join(conn, room_id, None).await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidPassword));
        let err = h.service.join(conn, room_id, Some("wrong")).await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidPassword));
        assert_eq!(h.sessions.current_room(conn), None);

        let room = h.service.join(conn, room_id, Some("sesame")).await.unwrap();
        assert_eq!(room.current_player_count, 2);
    }

    #[tokio::test]
    async fn leave_transfers_ownership_and_reindexes() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (owner_conn, _owner_rx) = h.connect(1);
        h.sessions.bind_room(owner_conn, room_id);

        let (conn_b, mut rx_b) = h.connect(2);
        h.service.join(conn_b, room_id, None).await.unwrap();
        let (conn_c, _rx_c) = h.connect(3);
        h.service.join(conn_c, room_id, None).await.unwrap();

        // Drain b's PlayerJoined broadcast for c.
        let _ = rx_b.try_recv();

        h.service.leave(owner_conn).await.unwrap();

        let room = h.room(room_id).await;
        room.check_invariants().unwrap();
        assert_eq!(room.current_player_count, 2);
        // User 2 had the lowest surviving position; they inherit the room.
        assert_eq!(room.owner_id, Uuid::from_u128(2));
        assert!(room.players[0].is_owner);
        assert_eq!(room.players[0].position, 0);
        assert_eq!(room.players[1].position, 1);
        assert_eq!(h.sessions.current_room(owner_conn), None);

        match rx_b.try_recv().unwrap() {
            ServerMessage::PlayerLeft {
                player_id,
                current_player_count,
                new_owner,
                ..
            } => {
                assert_eq!(player_id, Uuid::from_u128(1));
                assert_eq!(current_player_count, 2);
                assert_eq!(new_owner, Some(Uuid::from_u128(2)));
            }
            other => panic!("expected PlayerLeft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_then_leave_restores_prior_player_set() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let before = h.room(room_id).await;

        let (conn, _rx) = h.connect(2);
        h.service.join(conn, room_id, None).await.unwrap();
        h.service.leave(conn).await.unwrap();

        let mut after = h.room(room_id).await;
        after.check_invariants().unwrap();
        after.last_activity = before.last_activity;
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn last_leaver_deletes_room() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(1);
        h.sessions.bind_room(conn, room_id);

        h.service.leave(conn).await.unwrap();

        assert!(h.store.get(&room_key(room_id)).await.unwrap().is_none());
        assert!(h.directory.find_room(room_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leave_without_room_fails() {
        let h = Harness::new();
        let (conn, _rx) = h.connect(1);
        let err = h.service.leave(conn).await.unwrap_err();
        assert!(matches!(err, RoomError::NotInRoom));
    }

    #[tokio::test]
    async fn leave_with_stale_binding_clears_it() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(2);
        // Bound to the room but never seated.
        h.sessions.bind_room(conn, room_id);

        let err = h.service.leave(conn).await.unwrap_err();
        assert!(matches!(err, RoomError::PlayerNotInRoom));
        assert_eq!(h.sessions.current_room(conn), None);
    }

    #[tokio::test]
    async fn quick_match_joins_eligible_room() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(2);

        let (room, created) = h.service.quick_match(conn).await.unwrap();
        assert!(!created);
        assert_eq!(room.id, room_id);
        assert_eq!(room.current_player_count, 2);
    }

    #[tokio::test]
    async fn quick_match_skips_ineligible_rooms() {
        let h = Harness::new();
        // Protected room.
        h.seed_room(1, Some("secret")).await;
        // Playing room.
        let playing_id = h.seed_room(2, None).await;
        let mut playing = h.room(playing_id).await;
        playing.status = RoomStatus::Playing;
        h.store
            .set(&room_key(playing_id), serde_json::to_string(&playing).unwrap())
            .await
            .unwrap();
        // Room already seating the user.
        h.seed_room(5, None).await;

        let (conn, _rx) = h.connect(5);
        let (room, created) = h.service.quick_match(conn).await.unwrap();
        assert!(created, "all candidates ineligible, should create");
        assert_eq!(room.owner_id, Uuid::from_u128(5));
        assert_eq!(room.current_player_count, 1);
        assert!(room.players[0].is_owner);
        assert_eq!(room.max_players, DEFAULT_MAX_PLAYERS);
        assert_eq!(room.small_blind, DEFAULT_SMALL_BLIND);
        assert_eq!(room.big_blind, DEFAULT_BIG_BLIND);
        room.check_invariants().unwrap();

        // The created room is persisted and registered.
        assert_eq!(h.room(room.id).await, room);
        assert!(h.directory.find_room(room.id).await.unwrap().is_some());
        assert_eq!(h.sessions.current_room(conn), Some(room.id));
    }

    #[tokio::test]
    async fn current_room_reports_binding() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(2);

        let (id, state) = h.service.current_room(conn).await.unwrap();
        assert!(id.is_none() && state.is_none());

        h.service.join(conn, room_id, None).await.unwrap();
        let (id, state) = h.service.current_room(conn).await.unwrap();
        assert_eq!(id, Some(room_id));
        assert_eq!(state.unwrap().id, room_id);
    }

    #[tokio::test]
    async fn current_room_heals_missing_record() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (conn, _rx) = h.connect(2);
        h.service.join(conn, room_id, None).await.unwrap();

        // Record vanishes out from under the binding.
        h.store.delete(&room_key(room_id)).await.unwrap();

        let (id, state) = h.service.current_room(conn).await.unwrap();
        assert!(id.is_none() && state.is_none());
        assert_eq!(h.sessions.current_room(conn), None);
    }

    #[tokio::test]
    async fn disconnect_cleanup_leaves_room() {
        let h = Harness::new();
        let room_id = h.seed_room(1, None).await;
        let (owner_conn, mut owner_rx) = h.connect(1);
        h.sessions.bind_room(owner_conn, room_id);
        let (conn, _rx) = h.connect(2);
        h.service.join(conn, room_id, None).await.unwrap();
        let _ = owner_rx.try_recv();

        h.service.disconnect_cleanup(conn).await;

        let room = h.room(room_id).await;
        assert_eq!(room.current_player_count, 1);
        assert!(matches!(
            owner_rx.try_recv().unwrap(),
            ServerMessage::PlayerLeft { .. }
        ));

        // Cleanup with no binding is a no-op.
        h.service.disconnect_cleanup(conn).await;
    }
}
