//! Shared test fixtures: in-process transports and a server harness.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use card_room::error::CardRoomError;
use card_room::protocol::{
    PlayerEntry, RoomState, RoomStatus, SeatStatus, DEFAULT_BIG_BLIND, DEFAULT_CHIPS,
    DEFAULT_MAX_PLAYERS, DEFAULT_SMALL_BLIND,
};
use card_room::server::{
    DirectoryRecord, Identity, MemoryAuthenticator, MemoryDirectory, MemoryStore, RecordStore,
    RoomServer,
};
use card_room::transport::{Connect, Transport};
use card_room::{RoomId, UserId};

// ── Channel-pair transport ──────────────────────────────────────────

/// In-process [`Transport`] half; create with [`channel_pair`].
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Two connected loopback transports.
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (tx_a, rx_a) = mpsc::unbounded_channel();
    let (tx_b, rx_b) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            tx: Some(tx_a),
            rx: rx_b,
        },
        ChannelTransport {
            tx: Some(tx_b),
            rx: rx_a,
        },
    )
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: String) -> Result<(), CardRoomError> {
        match &self.tx {
            Some(tx) => tx
                .send(message)
                .map_err(|_| CardRoomError::TransportSend("peer gone".into())),
            None => Err(CardRoomError::TransportClosed),
        }
    }

    async fn recv(&mut self) -> Option<Result<String, CardRoomError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), CardRoomError> {
        // Dropping the sender makes the peer's recv return None.
        self.tx = None;
        Ok(())
    }
}

// ── Connectors ──────────────────────────────────────────────────────

/// A [`Connect`] that hands the server half of each fresh pair to an accept
/// queue, so tests can serve it (or drop it to simulate a refused connect).
pub struct ChannelConnector {
    accept_tx: mpsc::UnboundedSender<ChannelTransport>,
}

/// Build a connector and the matching accept queue.
pub fn channel_connector() -> (ChannelConnector, mpsc::UnboundedReceiver<ChannelTransport>) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (ChannelConnector { accept_tx }, accept_rx)
}

#[async_trait]
impl Connect for ChannelConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, CardRoomError> {
        let (client_half, server_half) = channel_pair();
        self.accept_tx
            .send(server_half)
            .map_err(|_| CardRoomError::TransportSend("acceptor gone".into()))?;
        Ok(Box::new(client_half))
    }
}

/// A [`Connect`] whose every attempt fails.
pub struct FailingConnector;

#[async_trait]
impl Connect for FailingConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, CardRoomError> {
        Err(CardRoomError::TransportSend("connection refused".into()))
    }
}

// ── Scripted transport ──────────────────────────────────────────────

/// A [`Transport`] that replays a script of incoming frames and records
/// everything sent. Once the script runs out, `recv` reports a closed
/// connection.
pub struct MockTransport {
    incoming: VecDeque<Result<String, CardRoomError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new(incoming: Vec<Result<String, CardRoomError>>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                incoming: incoming.into(),
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), CardRoomError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, CardRoomError>> {
        self.incoming.pop_front()
    }

    async fn close(&mut self) -> Result<(), CardRoomError> {
        Ok(())
    }
}

// ── Server harness ──────────────────────────────────────────────────

/// A fully wired in-memory server plus handles to its internals.
pub struct TestServer {
    pub server: Arc<RoomServer>,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
    pub authenticator: Arc<MemoryAuthenticator>,
}

impl TestServer {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let authenticator = Arc::new(MemoryAuthenticator::new());
        let store_dyn: Arc<dyn card_room::server::RecordStore> = store.clone();
        let directory_dyn: Arc<dyn card_room::server::RoomDirectory> = directory.clone();
        let authenticator_dyn: Arc<dyn card_room::server::Authenticator> = authenticator.clone();
        let server = Arc::new(RoomServer::new(store_dyn, directory_dyn, authenticator_dyn));
        Self {
            server,
            store,
            directory,
            authenticator,
        }
    }

    /// Register a token resolving to `user{n}`.
    pub fn add_user(&self, n: u128) -> (String, UserId) {
        let user_id = Uuid::from_u128(n);
        let token = format!("token-{n}");
        self.authenticator.insert(
            token.clone(),
            Identity {
                user_id,
                username: format!("user{n}"),
            },
        );
        (token, user_id)
    }

    /// Seed a one-owner room into directory and store; returns its id.
    pub async fn seed_room(&self, owner: u128, password: Option<&str>) -> RoomId {
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
        let json = serde_json::to_string(&room).expect("serialize room");
        self.store
            .set(&format!("room:{room_id}"), json)
            .await
            .expect("seed store");
        room_id
    }

    /// Fetch the persisted record for `room_id`, if it still exists.
    pub async fn room(&self, room_id: RoomId) -> Option<RoomState> {
        let json = self
            .store
            .get(&format!("room:{room_id}"))
            .await
            .expect("store get")?;
        Some(serde_json::from_str(&json).expect("parse room"))
    }

    /// Serve every transport arriving on the accept queue, each in its own
    /// task. Returns the acceptor task handle.
    pub fn serve(
        &self,
        mut accept_rx: mpsc::UnboundedReceiver<ChannelTransport>,
    ) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(&self.server);
        tokio::spawn(async move {
            while let Some(transport) = accept_rx.recv().await {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    let _ = server.serve_connection(transport).await;
                });
            }
        })
    }
}
