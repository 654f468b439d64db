//! Transport abstraction for the card-room wire protocol.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between a client and a server. The protocol uses JSON text messages, so
//! every transport implementation must handle message framing internally
//! (e.g., WebSocket frames, length-prefixed TCP, QUIC streams).
//!
//! [`Connect`] is the factory side: the client's reconnection machinery needs
//! to establish a *fresh* transport after every drop, so it holds a
//! connector rather than a single pre-connected channel. The server side
//! consumes already-accepted transports directly via
//! [`RoomServer::serve_connection`](crate::server::RoomServer::serve_connection).

use async_trait::async_trait;

use crate::error::CardRoomError;

/// A bidirectional text message transport for the card-room protocol.
///
/// Implementors shuttle serialized JSON strings between the two peers. Each
/// call to [`send`](Transport::send) transmits one complete JSON message;
/// each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Object Safety
///
/// This trait is object-safe; the client stores `Box<dyn Transport>` so a
/// connector can hand back any implementation.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations (e.g.,
/// wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`CardRoomError::TransportSend`] if the message could not be
    /// sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), CardRoomError>;

    /// Receive the next JSON text message from the peer.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the peer
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, CardRoomError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), CardRoomError>;
}

/// A factory for [`Transport`]s, used by the client's reconnection loop.
///
/// Every reconnect attempt calls [`connect`](Connect::connect) once; the
/// returned transport must be fully established and ready for the
/// authentication handshake.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    /// Establish a fresh transport to the server.
    ///
    /// # Errors
    ///
    /// Returns any [`CardRoomError`] the underlying transport produces when
    /// the connection cannot be established. The reconnection loop treats
    /// every error here as a failed attempt.
    async fn connect(&self) -> Result<Box<dyn Transport>, CardRoomError>;
}
