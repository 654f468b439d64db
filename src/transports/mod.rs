//! Bundled [`Transport`](crate::transport::Transport) implementations.
//!
//! Currently one implementation ships with the crate:
//!
//! - [`websocket`] — WebSocket client/server framing via `tokio-tungstenite`
//!   (feature `transport-websocket`, enabled by default).
//!
//! Custom backends only need to implement the two traits in
//! [`crate::transport`]; the integration tests drive the full client and
//! server over plain in-process channels.

#[cfg(feature = "transport-websocket")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport-websocket")))]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
