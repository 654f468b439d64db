//! Per-connection protocol loop.
//!
//! [`RoomServer::serve_connection`] drives one accepted
//! [`Transport`](crate::transport::Transport) through the authentication
//! handshake, then pumps requests into the [`RoomService`] and queued
//! outbound messages (acks and broadcasts alike) back out. Spawn one task
//! per accepted connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::error_codes::ErrorCode;
use crate::protocol::{
    ClientMessage, ConnectionId, CurrentRoomPayload, QuickMatchedPayload, RoomJoinedPayload,
    ServerMessage,
};
use crate::transport::Transport;

use super::directory::RoomDirectory;
use super::service::RoomService;
use super::session::{Identity, SessionRegistry};
use super::store::RecordStore;
use super::unix_millis;

/// Default deadline for the first (`Authenticate`) frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves opaque handshake tokens to identities.
///
/// The token format is outside this crate; deployments bring their own
/// verifier (JWT validation, a session lookup, an auth service call).
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Resolve `token`, or `None` when it is invalid or expired.
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Token table [`Authenticator`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    tokens: DashMap<String, Identity>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token.
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).map(|i| i.value().clone())
    }
}

/// Accepts authenticated connections and serves the membership protocol on
/// them.
pub struct RoomServer {
    service: Arc<RoomService>,
    sessions: Arc<SessionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    handshake_timeout: Duration,
}

impl RoomServer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<dyn RoomDirectory>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let service = Arc::new(RoomService::new(store, directory, Arc::clone(&sessions)));
        Self {
            service,
            sessions,
            authenticator,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Override the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// The shared mutation service.
    pub fn service(&self) -> &Arc<RoomService> {
        &self.service
    }

    /// The live connection registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Serve one accepted transport to completion.
    ///
    /// Performs the handshake, then runs until the peer disconnects or a
    /// transport error occurs. Membership cleanup (leaving the bound room)
    /// always runs on the way out.
    ///
    /// # Errors
    ///
    /// Returns a transport error if sending fails mid-session. A failed or
    /// missing handshake closes the connection and returns `Ok(())` — that
    /// is a protocol outcome, not a server fault.
    pub async fn serve_connection<T: Transport>(&self, mut transport: T) -> Result<()> {
        let identity = match self.handshake(&mut transport).await? {
            Some(identity) => identity,
            None => return Ok(()),
        };

        let conn: ConnectionId = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.sessions.register(conn, identity.clone(), tx);

        tracing::info!(%conn, user_id = %identity.user_id, username = %identity.username, "connection authenticated");

        let accepted = ServerMessage::Authenticated {
            user_id: identity.user_id,
            username: identity.username,
        };
        let result = async {
            transport.send(serde_json::to_string(&accepted)?).await?;

            loop {
                tokio::select! {
                    queued = rx.recv() => {
                        // The registry holds the other sender half, so recv
                        // only returns None after unregistration.
                        let Some(message) = queued else { break };
                        transport.send(serde_json::to_string(&message)?).await?;
                    }
                    incoming = transport.recv() => {
                        match incoming {
                            Some(Ok(text)) => self.dispatch(conn, &text).await,
                            Some(Err(err)) => {
                                tracing::warn!(%conn, %err, "transport error, closing connection");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        self.service.disconnect_cleanup(conn).await;
        self.sessions.unregister(conn);
        tracing::info!(%conn, "connection closed");

        let _ = transport.close().await;
        result
    }

    /// Await and validate the `Authenticate` frame.
    async fn handshake<T: Transport>(&self, transport: &mut T) -> Result<Option<Identity>> {
        let first = tokio::time::timeout(self.handshake_timeout, transport.recv()).await;
        let frame = match first {
            Err(_) => {
                tracing::warn!("handshake timed out");
                self.reject(transport, "Handshake timed out").await?;
                return Ok(None);
            }
            Ok(None) => return Ok(None),
            Ok(Some(Err(err))) => return Err(err),
            Ok(Some(Ok(text))) => text,
        };

        let token = match serde_json::from_str::<ClientMessage>(&frame) {
            Ok(ClientMessage::Authenticate { token }) => token,
            Ok(other) => {
                tracing::warn!(message = ?other, "first frame was not Authenticate");
                self.reject(transport, "Authentication required").await?;
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(%err, "unparseable handshake frame");
                self.reject(transport, "Authentication required").await?;
                return Ok(None);
            }
        };

        match self.authenticator.verify(&token).await {
            Some(identity) => Ok(Some(identity)),
            None => {
                tracing::warn!("handshake token rejected");
                self.reject(transport, "Invalid token").await?;
                Ok(None)
            }
        }
    }

    async fn reject<T: Transport>(&self, transport: &mut T, reason: &str) -> Result<()> {
        let message = ServerMessage::AuthenticationError {
            error: reason.to_string(),
            error_code: ErrorCode::AuthenticationFailed,
        };
        transport.send(serde_json::to_string(&message)?).await?;
        transport.close().await?;
        Ok(())
    }

    /// Handle one inbound frame from an authenticated connection.
    async fn dispatch(&self, conn: ConnectionId, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%conn, %err, "dropping unparseable frame");
                return;
            }
        };

        let reply = match message {
            ClientMessage::Authenticate { .. } => {
                tracing::warn!(%conn, "ignoring repeated Authenticate");
                return;
            }
            ClientMessage::Ping { request_id } => ServerMessage::Pong {
                request_id,
                timestamp: unix_millis(),
            },
            ClientMessage::JoinRoom {
                request_id,
                room_id,
                password,
            } => match self.service.join(conn, room_id, password.as_deref()).await {
                Ok(room_state) => ServerMessage::RoomJoined(Box::new(RoomJoinedPayload {
                    request_id,
                    room_state,
                })),
                Err(err) => Self::failure(conn, request_id, &err),
            },
            ClientMessage::LeaveRoom { request_id } => match self.service.leave(conn).await {
                Ok(()) => ServerMessage::RoomLeft { request_id },
                Err(err) => Self::failure(conn, request_id, &err),
            },
            ClientMessage::QuickMatch { request_id } => match self.service.quick_match(conn).await
            {
                Ok((room_state, created)) => {
                    ServerMessage::QuickMatched(Box::new(QuickMatchedPayload {
                        request_id,
                        room_state,
                        created,
                    }))
                }
                Err(err) => Self::failure(conn, request_id, &err),
            },
            ClientMessage::GetCurrentRoom { request_id } => {
                match self.service.current_room(conn).await {
                    Ok((room_id, room_state)) => {
                        ServerMessage::CurrentRoom(Box::new(CurrentRoomPayload {
                            request_id,
                            room_id,
                            room_state,
                        }))
                    }
                    Err(err) => Self::failure(conn, request_id, &err),
                }
            }
        };

        // Acks ride the same queue as broadcasts so each connection sees a
        // single ordered stream.
        if !self.sessions.send_to(conn, reply) {
            tracing::warn!(%conn, "connection vanished before ack could be queued");
        }
    }

    fn failure(
        conn: ConnectionId,
        request_id: crate::protocol::RequestId,
        err: &super::service::RoomError,
    ) -> ServerMessage {
        if err.is_internal() {
            tracing::error!(%conn, ?err, "request failed with internal error");
        } else {
            tracing::debug!(%conn, %err, "request rejected");
        }
        ServerMessage::RequestFailed {
            request_id,
            message: err.to_string(),
            error_code: Some(err.error_code()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_authenticator_resolves_known_tokens() {
        let auth = MemoryAuthenticator::new();
        let identity = Identity {
            user_id: Uuid::from_u128(1),
            username: "alice".into(),
        };
        auth.insert("token-1", identity.clone());

        assert_eq!(auth.verify("token-1").await, Some(identity));
        assert_eq!(auth.verify("nope").await, None);
    }
}
