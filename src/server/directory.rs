//! Room discovery and password verification.
//!
//! The directory is the only place that ever sees a room password. The
//! shared [`RoomState`](crate::protocol::RoomState) record carries just the
//! `has_password` flag, so a compromised record store leaks no secrets and
//! clients cannot be handed a hash to crack offline.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::protocol::{RoomId, RoomStatus, UserId};

use super::store::StoreError;

/// Directory metadata for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub room_id: RoomId,
    pub owner_id: UserId,
    pub status: RoomStatus,
    pub has_password: bool,
}

/// Parameters for synthesizing a room (quick match, lobby creation).
#[derive(Debug, Clone)]
pub struct CreateRoomParams {
    pub owner_id: UserId,
    pub max_players: usize,
    pub small_blind: u64,
    pub big_blind: u64,
    pub password: Option<String>,
}

/// Room lookup and secret verification.
///
/// Like [`RecordStore`](super::store::RecordStore) this is a trait so the
/// in-memory implementation can be swapped for a database-backed one.
#[async_trait]
pub trait RoomDirectory: Send + Sync + 'static {
    /// Look up a room by id.
    async fn find_room(&self, room_id: RoomId) -> Result<Option<DirectoryRecord>, StoreError>;

    /// Check a supplied password against the room's secret.
    ///
    /// Returns `true` when the room has no password, or when `supplied`
    /// matches it. A protected room with no supplied password returns
    /// `false`.
    async fn verify_password(
        &self,
        room_id: RoomId,
        supplied: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Register a new room and return its id.
    async fn create_room(&self, params: CreateRoomParams) -> Result<RoomId, StoreError>;

    /// Remove a room from the directory. Removing a missing room is not an
    /// error.
    async fn remove_room(&self, room_id: RoomId) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct DirectoryEntry {
    record: DirectoryRecord,
    // Stand-in for a password hash; a production directory stores a salted
    // hash instead of the secret itself.
    password: Option<String>,
}

/// In-memory [`RoomDirectory`] backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    rooms: DashMap<RoomId, DirectoryEntry>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a room without going through [`create_room`]. Intended
    /// for tests and bootstrap fixtures.
    pub fn seed(&self, record: DirectoryRecord, password: Option<String>) {
        self.rooms
            .insert(record.room_id, DirectoryEntry { record, password });
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn find_room(&self, room_id: RoomId) -> Result<Option<DirectoryRecord>, StoreError> {
        Ok(self.rooms.get(&room_id).map(|e| e.value().record.clone()))
    }

    async fn verify_password(
        &self,
        room_id: RoomId,
        supplied: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(entry) = self.rooms.get(&room_id) else {
            return Ok(false);
        };
        Ok(match (&entry.value().password, supplied) {
            (None, _) => true,
            (Some(expected), Some(given)) => expected == given,
            (Some(_), None) => false,
        })
    }

    async fn create_room(&self, params: CreateRoomParams) -> Result<RoomId, StoreError> {
        let room_id = Uuid::new_v4();
        let has_password = params.password.is_some();
        self.rooms.insert(
            room_id,
            DirectoryEntry {
                record: DirectoryRecord {
                    room_id,
                    owner_id: params.owner_id,
                    status: RoomStatus::Waiting,
                    has_password,
                },
                password: params.password,
            },
        );
        Ok(room_id)
    }

    async fn remove_room(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.rooms.remove(&room_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn params(password: Option<&str>) -> CreateRoomParams {
        CreateRoomParams {
            owner_id: Uuid::from_u128(1),
            max_players: 6,
            small_blind: 10,
            big_blind: 20,
            password: password.map(String::from),
        }
    }

    #[tokio::test]
    async fn create_and_find_room() {
        let dir = MemoryDirectory::new();
        let id = dir.create_room(params(None)).await.unwrap();

        let record = dir.find_room(id).await.unwrap().unwrap();
        assert_eq!(record.room_id, id);
        assert_eq!(record.status, RoomStatus::Waiting);
        assert!(!record.has_password);

        dir.remove_room(id).await.unwrap();
        assert!(dir.find_room(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_room_accepts_any_password() {
        let dir = MemoryDirectory::new();
        let id = dir.create_room(params(None)).await.unwrap();

        assert!(dir.verify_password(id, None).await.unwrap());
        assert!(dir.verify_password(id, Some("whatever")).await.unwrap());
    }

    #[tokio::test]
    async fn protected_room_requires_exact_match() {
        let dir = MemoryDirectory::new();
        let id = dir.create_room(params(Some("sesame"))).await.unwrap();

        assert!(dir.verify_password(id, Some("sesame")).await.unwrap());
        assert!(!dir.verify_password(id, Some("wrong")).await.unwrap());
        assert!(!dir.verify_password(id, None).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_room_never_verifies() {
        let dir = MemoryDirectory::new();
        assert!(!dir
            .verify_password(Uuid::from_u128(42), None)
            .await
            .unwrap());
    }
}
