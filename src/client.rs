//! The card-room client: a thin handle in front of a background connection
//! task.
//!
//! [`CardRoomClient::connect`] establishes and authenticates a transport,
//! then spawns a task that owns it. The handle talks to the task over an
//! unbounded command channel; request/ack correlation rides a per-request
//! `oneshot`. The task emits [`CardRoomEvent`]s on the bounded channel
//! returned from `connect` — when the consumer falls behind, new events are
//! dropped rather than blocking the connection.
//!
//! The task also runs the reconnection state machine: on transport drop it
//! backs off exponentially, re-authenticates, and reconciles the local room
//! cache against the server's authoritative answer before resuming.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CardRoomError, Result};
use crate::event::{CardRoomEvent, ConnectionStatus, NetworkQuality};
use crate::protocol::{ClientMessage, RequestId, RoomId, RoomState, ServerMessage, UserId};
use crate::recovery::{reconcile, ClientCache, RecoveryOutcome};
use crate::transport::{Connect, Transport};

/// Configuration for [`CardRoomClient::connect`].
#[derive(Debug, Clone)]
pub struct CardRoomConfig {
    /// Opaque handshake token presented to the server.
    pub token: String,
    /// How long to wait for the ack of one request.
    pub request_timeout: Duration,
    /// Interval between latency probes while connected.
    pub ping_interval: Duration,
    /// First reconnect delay; doubles each failed attempt.
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_cap: Duration,
    /// Reconnect attempts before giving up and entering the error state.
    pub max_reconnect_attempts: u32,
    /// Capacity of the event channel (clamped to at least 1).
    pub event_channel_capacity: usize,
    /// How long [`disconnect`](CardRoomClient::disconnect) waits for the
    /// background task before aborting it.
    pub shutdown_timeout: Duration,
    /// Deadline for the authentication handshake on each connect.
    pub handshake_timeout: Duration,
}

impl CardRoomConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            request_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            event_channel_capacity: 256,
            shutdown_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_cap = cap;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Delay before reconnect attempt number `attempt` (0-based).
pub(crate) fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Result of a successful [`quick_match`](CardRoomClient::quick_match).
#[derive(Debug, Clone)]
pub struct QuickMatchOutcome {
    pub room_state: RoomState,
    /// `true` when no open room existed and one was created for us.
    pub created: bool,
}

enum Command {
    Request {
        message: ClientMessage,
        ack: oneshot::Sender<ServerMessage>,
    },
    Retry,
    Disconnect(oneshot::Sender<()>),
}

/// State shared between the handle and the background task.
#[derive(Debug)]
struct Shared {
    status: Mutex<ConnectionStatus>,
    identity: Mutex<Option<(UserId, String)>>,
    cache: Mutex<ClientCache>,
    connected: AtomicBool,
    next_request_id: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(ConnectionStatus::Disconnected),
            identity: Mutex::new(None),
            cache: Mutex::new(ClientCache::new()),
            connected: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
        }
    }
}

/// Handle to a card-room connection.
///
/// Cheap to use from any task. Dropping the handle aborts the background
/// task; prefer [`disconnect`](CardRoomClient::disconnect) for a graceful
/// close.
#[derive(Debug)]
pub struct CardRoomClient {
    command_tx: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl CardRoomClient {
    /// Connect, authenticate, and spawn the background connection task.
    ///
    /// Returns the handle and the event channel. The initial connect is not
    /// retried — a failure here is returned to the caller; automatic
    /// reconnection only covers drops of an established connection.
    ///
    /// # Errors
    ///
    /// Any transport error from the connector, or
    /// [`CardRoomError::AuthenticationFailed`] when the server rejects the
    /// token.
    pub async fn connect<C: Connect>(
        connector: C,
        config: CardRoomConfig,
    ) -> Result<(Self, mpsc::Receiver<CardRoomEvent>)> {
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared::new());

        set_status(&shared, &event_tx, ConnectionStatus::Connecting).await;

        let mut transport = match connector.connect().await {
            Ok(transport) => transport,
            Err(err) => {
                set_status(&shared, &event_tx, ConnectionStatus::Disconnected).await;
                return Err(err);
            }
        };
        let identity =
            match authenticate(transport.as_mut(), &config.token, config.handshake_timeout).await
            {
                Ok(identity) => identity,
                Err(err) => {
                    set_status(&shared, &event_tx, ConnectionStatus::Disconnected).await;
                    return Err(err);
                }
            };
        *shared.identity.lock().await = Some(identity);
        shared.connected.store(true, Ordering::SeqCst);
        set_status(&shared, &event_tx, ConnectionStatus::Connected).await;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let request_timeout = config.request_timeout;
        let shutdown_timeout = config.shutdown_timeout;

        let runner = Runner {
            connector: Box::new(connector),
            config,
            shared: Arc::clone(&shared),
            command_rx,
            event_tx,
        };
        let task = tokio::spawn(runner.run(transport));

        Ok((
            Self {
                command_tx,
                task: Some(task),
                shared,
                request_timeout,
                shutdown_timeout,
            },
            event_rx,
        ))
    }

    /// Join an existing room, optionally with a password.
    ///
    /// # Errors
    ///
    /// [`CardRoomError::Server`] with the server's rejection,
    /// [`CardRoomError::NotConnected`] while the connection is down, or
    /// [`CardRoomError::Timeout`] when the ack never arrives.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        password: Option<String>,
    ) -> Result<RoomState> {
        let request_id = self.next_request_id();
        let reply = self
            .request(ClientMessage::JoinRoom {
                request_id,
                room_id,
                password,
            })
            .await?;
        match reply {
            ServerMessage::RoomJoined(payload) => Ok(payload.room_state),
            other => Err(unexpected_ack("RoomJoined", &other)),
        }
    }

    /// Leave the current room.
    pub async fn leave_room(&self) -> Result<()> {
        let request_id = self.next_request_id();
        let reply = self.request(ClientMessage::LeaveRoom { request_id }).await?;
        match reply {
            ServerMessage::RoomLeft { .. } => Ok(()),
            other => Err(unexpected_ack("RoomLeft", &other)),
        }
    }

    /// Join the first eligible open room, or create a fresh one.
    pub async fn quick_match(&self) -> Result<QuickMatchOutcome> {
        let request_id = self.next_request_id();
        let reply = self.request(ClientMessage::QuickMatch { request_id }).await?;
        match reply {
            ServerMessage::QuickMatched(payload) => Ok(QuickMatchOutcome {
                room_state: payload.room_state,
                created: payload.created,
            }),
            other => Err(unexpected_ack("QuickMatched", &other)),
        }
    }

    /// Ask the server which room this session is bound to.
    pub async fn current_room(&self) -> Result<Option<RoomState>> {
        let request_id = self.next_request_id();
        let reply = self
            .request(ClientMessage::GetCurrentRoom { request_id })
            .await?;
        match reply {
            ServerMessage::CurrentRoom(payload) => Ok(payload.room_state),
            other => Err(unexpected_ack("CurrentRoom", &other)),
        }
    }

    /// Measure one round trip to the server.
    ///
    /// The background task also probes on its own interval; this is for
    /// callers that want an on-demand sample.
    pub async fn ping(&self) -> Result<Duration> {
        let request_id = self.next_request_id();
        let started = Instant::now();
        let reply = self.request(ClientMessage::Ping { request_id }).await?;
        match reply {
            ServerMessage::Pong { .. } => Ok(started.elapsed()),
            other => Err(unexpected_ack("Pong", &other)),
        }
    }

    /// Kick the reconnection machinery out of the error state.
    ///
    /// No-op while connected or already reconnecting.
    ///
    /// # Errors
    ///
    /// [`CardRoomError::NotConnected`] if the background task is gone.
    pub fn retry(&self) -> Result<()> {
        self.command_tx
            .send(Command::Retry)
            .map_err(|_| CardRoomError::NotConnected)
    }

    /// Gracefully shut down the connection.
    ///
    /// Waits briefly for the background task to close the transport, then
    /// aborts it.
    pub async fn disconnect(&mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(Command::Disconnect(ack_tx)).is_ok() {
            if tokio::time::timeout(self.shutdown_timeout, ack_rx)
                .await
                .is_err()
            {
                tracing::warn!("background task did not shut down in time, aborting");
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.status.lock().await = ConnectionStatus::Disconnected;
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock().await
    }

    /// Snapshot of the local room cache. Advisory only; the server is
    /// authoritative.
    pub async fn cache(&self) -> ClientCache {
        self.shared.cache.lock().await.clone()
    }

    /// The authenticated identity, once the handshake has completed.
    pub async fn identity(&self) -> Option<(UserId, String)> {
        self.shared.identity.lock().await.clone()
    }

    /// Whether the connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn next_request_id(&self) -> RequestId {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, message: ClientMessage) -> Result<ServerMessage> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Request {
                message,
                ack: ack_tx,
            })
            .map_err(|_| CardRoomError::NotConnected)?;

        let reply = match tokio::time::timeout(self.request_timeout, ack_rx).await {
            Err(_) => return Err(CardRoomError::Timeout),
            // The task dropped the ack sender: connection went down before
            // the ack arrived.
            Ok(Err(_)) => return Err(CardRoomError::NotConnected),
            Ok(Ok(reply)) => reply,
        };

        match reply {
            ServerMessage::RequestFailed {
                message,
                error_code,
                ..
            } => Err(CardRoomError::Server {
                message,
                error_code,
            }),
            other => Ok(other),
        }
    }
}

impl Drop for CardRoomClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn unexpected_ack(expected: &str, got: &ServerMessage) -> CardRoomError {
    CardRoomError::Protocol(format!("expected {expected} ack, got {got:?}"))
}

async fn set_status(
    shared: &Shared,
    event_tx: &mpsc::Sender<CardRoomEvent>,
    status: ConnectionStatus,
) {
    let mut current = shared.status.lock().await;
    if *current == status {
        return;
    }
    *current = status;
    drop(current);
    emit_event(event_tx, CardRoomEvent::ConnectionStatusChanged { status });
}

/// Deliver an event without blocking the connection task. Events are
/// dropped when the consumer falls behind.
fn emit_event(event_tx: &mpsc::Sender<CardRoomEvent>, event: CardRoomEvent) {
    if let Err(err) = event_tx.try_send(event) {
        tracing::warn!(%err, "event channel full or closed, dropping event");
    }
}

/// Run the authentication handshake on a fresh transport.
async fn authenticate(
    transport: &mut dyn Transport,
    token: &str,
    deadline: Duration,
) -> Result<(UserId, String)> {
    let handshake = async {
        let hello = ClientMessage::Authenticate {
            token: token.to_string(),
        };
        transport.send(serde_json::to_string(&hello)?).await?;

        loop {
            let frame = match transport.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Err(err),
                None => return Err(CardRoomError::TransportClosed),
            };
            match serde_json::from_str::<ServerMessage>(&frame)? {
                ServerMessage::Authenticated { user_id, username } => {
                    return Ok((user_id, username));
                }
                ServerMessage::AuthenticationError { error, .. } => {
                    return Err(CardRoomError::AuthenticationFailed { reason: error });
                }
                other => {
                    tracing::debug!(?other, "ignoring message during handshake");
                }
            }
        }
    };
    tokio::time::timeout(deadline, handshake)
        .await
        .map_err(|_| CardRoomError::Timeout)?
}

/// Why a session over one transport ended.
enum SessionEnd {
    /// Graceful shutdown requested (carries the ack to fire once closed).
    Shutdown(Option<oneshot::Sender<()>>),
    /// The transport dropped; reconnection should take over.
    Dropped,
}

/// What the reconnection loop produced.
enum ReconnectEnd {
    Transport(Box<dyn Transport>),
    Shutdown(Option<oneshot::Sender<()>>),
    /// Attempts exhausted, or the server rejected our token.
    GaveUp,
}

struct Runner {
    connector: Box<dyn Connect>,
    config: CardRoomConfig,
    shared: Arc<Shared>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<CardRoomEvent>,
}

impl Runner {
    async fn run(mut self, mut transport: Box<dyn Transport>) {
        // The initial session follows a fresh handshake, so no recovery.
        let mut recover = false;
        'session: loop {
            match self.session(transport.as_mut(), recover).await {
                SessionEnd::Shutdown(ack) => {
                    self.shutdown(Some(transport.as_mut()), ack).await;
                    return;
                }
                SessionEnd::Dropped => {}
            }

            self.shared.connected.store(false, Ordering::SeqCst);
            set_status(&self.shared, &self.event_tx, ConnectionStatus::Reconnecting).await;

            loop {
                match self.reconnect().await {
                    ReconnectEnd::Transport(fresh) => {
                        transport = fresh;
                        recover = true;
                        continue 'session;
                    }
                    ReconnectEnd::Shutdown(ack) => {
                        self.shutdown(None, ack).await;
                        return;
                    }
                    ReconnectEnd::GaveUp => {
                        set_status(&self.shared, &self.event_tx, ConnectionStatus::Error).await;
                        match self.idle_in_error().await {
                            Some(ack) => {
                                self.shutdown(None, ack).await;
                                return;
                            }
                            // Retry requested; run another round of
                            // reconnect attempts.
                            None => {}
                        }
                    }
                }
            }
        }
    }

    async fn shutdown(
        &mut self,
        transport: Option<&mut dyn Transport>,
        ack: Option<oneshot::Sender<()>>,
    ) {
        if let Some(transport) = transport {
            if let Err(err) = transport.close().await {
                tracing::debug!(%err, "transport close failed during shutdown");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        set_status(&self.shared, &self.event_tx, ConnectionStatus::Disconnected).await;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        tracing::debug!("connection task shut down");
    }

    /// Pump one established connection until shutdown or drop.
    async fn session(&mut self, transport: &mut dyn Transport, recover: bool) -> SessionEnd {
        let mut pending: HashMap<RequestId, oneshot::Sender<ServerMessage>> = HashMap::new();
        let mut pending_pings: HashMap<RequestId, Instant> = HashMap::new();
        let mut recovery: Option<(RequestId, Instant)> = None;

        if recover {
            let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
            let probe = ClientMessage::GetCurrentRoom { request_id };
            match send_message(transport, &probe).await {
                Ok(()) => {
                    recovery = Some((request_id, Instant::now() + self.config.request_timeout));
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to send recovery probe");
                    return SessionEnd::Dropped;
                }
            }
        }

        let mut ping_timer = tokio::time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let recovery_deadline = recovery
                .map(|(_, deadline)| deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        // Every handle is gone; nothing left to serve.
                        None => return SessionEnd::Shutdown(None),
                        Some(Command::Disconnect(ack)) => {
                            return SessionEnd::Shutdown(Some(ack));
                        }
                        Some(Command::Retry) => {
                            tracing::debug!("retry requested while connected, ignoring");
                        }
                        Some(Command::Request { message, ack }) => {
                            let Some(request_id) = message.request_id() else {
                                tracing::warn!("dropping request without an id");
                                continue;
                            };
                            match send_message(transport, &message).await {
                                Ok(()) => {
                                    pending.insert(request_id, ack);
                                }
                                Err(err) => {
                                    tracing::warn!(%err, "send failed, connection dropped");
                                    // Dropping `ack` fails the caller fast.
                                    return SessionEnd::Dropped;
                                }
                            }
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    let request_id =
                        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
                    let probe = ClientMessage::Ping { request_id };
                    match send_message(transport, &probe).await {
                        Ok(()) => {
                            pending_pings.insert(request_id, Instant::now());
                        }
                        Err(err) => {
                            tracing::warn!(%err, "ping send failed, connection dropped");
                            return SessionEnd::Dropped;
                        }
                    }
                }
                _ = tokio::time::sleep_until(recovery_deadline), if recovery.is_some() => {
                    recovery = None;
                    tracing::warn!("state recovery probe timed out");
                    emit_event(&self.event_tx, CardRoomEvent::StateRecoveryFailed {
                        reason: "recovery request timed out".to_string(),
                    });
                }
                incoming = transport.recv() => {
                    let text = match incoming {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => {
                            tracing::warn!(%err, "transport error, connection dropped");
                            return SessionEnd::Dropped;
                        }
                        None => {
                            tracing::info!("server closed the connection");
                            return SessionEnd::Dropped;
                        }
                    };
                    let message = match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::warn!(%err, "dropping unparseable frame");
                            continue;
                        }
                    };
                    self.handle_server_message(
                        message,
                        &mut pending,
                        &mut pending_pings,
                        &mut recovery,
                    )
                    .await;
                }
            }
        }
    }

    async fn handle_server_message(
        &mut self,
        message: ServerMessage,
        pending: &mut HashMap<RequestId, oneshot::Sender<ServerMessage>>,
        pending_pings: &mut HashMap<RequestId, Instant>,
        recovery: &mut Option<(RequestId, Instant)>,
    ) {
        if let Some(request_id) = message.request_id() {
            if let Some(sent_at) = pending_pings.remove(&request_id) {
                let rtt = sent_at.elapsed();
                emit_event(
                    &self.event_tx,
                    CardRoomEvent::NetworkQualityUpdate {
                        quality: NetworkQuality::from_rtt(rtt),
                        rtt_ms: rtt.as_millis() as u64,
                    },
                );
                return;
            }
            if recovery.map(|(id, _)| id) == Some(request_id) {
                *recovery = None;
                self.finish_recovery(message).await;
                return;
            }
            match pending.remove(&request_id) {
                Some(ack) => {
                    self.update_cache_from_ack(&message).await;
                    // Caller may have timed out and dropped the receiver.
                    let _ = ack.send(message);
                }
                None => {
                    tracing::warn!(request_id, "ack with no pending request, dropping");
                }
            }
            return;
        }

        match message {
            ServerMessage::PlayerJoined {
                player,
                current_player_count,
            } => {
                {
                    let mut cache = self.shared.cache.lock().await;
                    if let Some(room) = cache.current_room.as_mut() {
                        room.players.push(player.clone());
                        room.current_player_count = current_player_count;
                    }
                }
                emit_event(
                    &self.event_tx,
                    CardRoomEvent::PlayerJoined {
                        player,
                        current_player_count,
                    },
                );
            }
            ServerMessage::PlayerLeft {
                player_id,
                username,
                current_player_count,
                new_owner,
            } => {
                {
                    let mut cache = self.shared.cache.lock().await;
                    if let Some(room) = cache.current_room.as_mut() {
                        room.players.retain(|p| p.id != player_id);
                        for (position, player) in room.players.iter_mut().enumerate() {
                            player.position = position;
                        }
                        room.current_player_count = current_player_count;
                        if let Some(owner_id) = new_owner {
                            room.owner_id = owner_id;
                            for player in room.players.iter_mut() {
                                player.is_owner = player.id == owner_id;
                            }
                        }
                    }
                }
                emit_event(
                    &self.event_tx,
                    CardRoomEvent::PlayerLeft {
                        player_id,
                        username,
                        current_player_count,
                        new_owner,
                    },
                );
            }
            other => {
                tracing::debug!(?other, "unexpected broadcast, ignoring");
            }
        }
    }

    /// Apply the authoritative `GetCurrentRoom` answer after a reconnect.
    async fn finish_recovery(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::CurrentRoom(payload) => {
                let mut cache = self.shared.cache.lock().await;
                let outcome = reconcile(&mut cache, payload.room_state.as_ref());
                drop(cache);
                match outcome {
                    RecoveryOutcome::InSync => {
                        tracing::debug!("state recovery: cache in sync with server");
                    }
                    RecoveryOutcome::Rejoined(room_id) => {
                        tracing::info!(%room_id, "state recovery: adopted server room");
                        if let Some(room_state) = payload.room_state {
                            emit_event(
                                &self.event_tx,
                                CardRoomEvent::Reconnected {
                                    room_id,
                                    room_state: Box::new(room_state),
                                },
                            );
                        }
                    }
                    RecoveryOutcome::Cleared => {
                        tracing::info!("state recovery: server reports no room, cache cleared");
                    }
                }
            }
            ServerMessage::RequestFailed { message, .. } => {
                tracing::warn!(%message, "state recovery probe failed");
                emit_event(
                    &self.event_tx,
                    CardRoomEvent::StateRecoveryFailed { reason: message },
                );
            }
            other => {
                tracing::warn!(?other, "unexpected recovery ack shape");
                emit_event(
                    &self.event_tx,
                    CardRoomEvent::StateRecoveryFailed {
                        reason: "unexpected recovery ack shape".to_string(),
                    },
                );
            }
        }
    }

    /// Keep the local cache roughly current from acks between recoveries.
    async fn update_cache_from_ack(&self, message: &ServerMessage) {
        let mut cache = self.shared.cache.lock().await;
        match message {
            ServerMessage::RoomJoined(payload) => cache.apply_room(&payload.room_state),
            ServerMessage::QuickMatched(payload) => cache.apply_room(&payload.room_state),
            ServerMessage::RoomLeft { .. } => cache.clear_room(),
            ServerMessage::CurrentRoom(payload) => {
                let _ = reconcile(&mut cache, payload.room_state.as_ref());
            }
            _ => {}
        }
    }

    /// Exponential-backoff reconnection. Stays responsive to commands while
    /// sleeping: requests fail fast, `Retry` skips the rest of the delay,
    /// `Disconnect` ends the task.
    async fn reconnect(&mut self) -> ReconnectEnd {
        for attempt in 0..self.config.max_reconnect_attempts {
            let delay = backoff_delay(
                self.config.reconnect_base,
                self.config.reconnect_cap,
                attempt,
            );
            tracing::info!(
                attempt = attempt + 1,
                max = self.config.max_reconnect_attempts,
                ?delay,
                "reconnect attempt scheduled"
            );
            if let Some(end) = self.backoff_sleep(delay).await {
                return end;
            }

            let mut transport = match self.connector.connect().await {
                Ok(transport) => transport,
                Err(err) => {
                    tracing::warn!(%err, attempt = attempt + 1, "reconnect attempt failed");
                    continue;
                }
            };
            match authenticate(
                transport.as_mut(),
                &self.config.token,
                self.config.handshake_timeout,
            )
            .await
            {
                Ok(identity) => {
                    *self.shared.identity.lock().await = Some(identity);
                    self.shared.connected.store(true, Ordering::SeqCst);
                    set_status(&self.shared, &self.event_tx, ConnectionStatus::Connected).await;
                    tracing::info!(attempt = attempt + 1, "reconnected");
                    return ReconnectEnd::Transport(transport);
                }
                Err(CardRoomError::AuthenticationFailed { reason }) => {
                    // The token is no longer valid; retrying cannot help.
                    tracing::error!(%reason, "re-authentication rejected, giving up");
                    return ReconnectEnd::GaveUp;
                }
                Err(err) => {
                    tracing::warn!(%err, attempt = attempt + 1, "handshake failed on reconnect");
                    continue;
                }
            }
        }
        tracing::error!(
            attempts = self.config.max_reconnect_attempts,
            "reconnect attempts exhausted"
        );
        ReconnectEnd::GaveUp
    }

    /// Sleep for `delay` while failing requests fast and honoring
    /// `Retry`/`Disconnect`.
    async fn backoff_sleep(&mut self, delay: Duration) -> Option<ReconnectEnd> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                command = self.command_rx.recv() => match command {
                    None => return Some(ReconnectEnd::Shutdown(None)),
                    Some(Command::Disconnect(ack)) => {
                        return Some(ReconnectEnd::Shutdown(Some(ack)));
                    }
                    // Skip the rest of the delay.
                    Some(Command::Retry) => return None,
                    Some(Command::Request { ack, .. }) => drop(ack),
                },
            }
        }
    }

    /// Park in the error state until the caller retries or disconnects.
    ///
    /// Returns `Some(ack)` for shutdown, `None` for retry.
    async fn idle_in_error(&mut self) -> Option<Option<oneshot::Sender<()>>> {
        loop {
            match self.command_rx.recv().await {
                None => return Some(None),
                Some(Command::Disconnect(ack)) => return Some(Some(ack)),
                Some(Command::Retry) => {
                    tracing::info!("retry requested, leaving error state");
                    set_status(&self.shared, &self.event_tx, ConnectionStatus::Reconnecting)
                        .await;
                    return None;
                }
                Some(Command::Request { ack, .. }) => drop(ack),
            }
        }
    }
}

async fn send_message(transport: &mut dyn Transport, message: &ClientMessage) -> Result<()> {
    transport.send(serde_json::to_string(message)?).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_secs(16));
        assert_eq!(backoff_delay(base, cap, 5), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, cap, 9), Duration::from_secs(30));
        // Absurd attempt numbers must not overflow.
        assert_eq!(backoff_delay(base, cap, 63), Duration::from_secs(30));
    }

    #[test]
    fn config_defaults() {
        let config = CardRoomConfig::new("token");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_cap, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 10);
    }
}
