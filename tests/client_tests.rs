//! Client state-machine tests against a hand-driven fake server, giving the
//! tests full control over drops, recovery answers, and handshake outcomes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use card_room::protocol::{
    ClientMessage, CurrentRoomPayload, PlayerEntry, RequestId, RoomJoinedPayload, RoomState,
    RoomStatus, SeatStatus, ServerMessage, DEFAULT_BIG_BLIND, DEFAULT_CHIPS, DEFAULT_MAX_PLAYERS,
    DEFAULT_SMALL_BLIND,
};
use card_room::transport::Transport;
use card_room::{
    CardRoomClient, CardRoomConfig, CardRoomError, CardRoomEvent, ConnectionStatus,
    NetworkQuality,
};

use common::{channel_connector, ChannelTransport};

const USER: Uuid = Uuid::from_u128(42);

fn config() -> CardRoomConfig {
    CardRoomConfig::new("test-token")
        .with_ping_interval(Duration::from_secs(3600))
        .with_reconnect_backoff(Duration::from_millis(1), Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(5))
}

fn room(id_seed: u128) -> RoomState {
    RoomState {
        id: Uuid::from_u128(id_seed),
        owner_id: USER,
        players: vec![PlayerEntry {
            id: USER,
            username: "tester".into(),
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
        last_activity: 0,
    }
}

async fn send(transport: &mut ChannelTransport, message: &ServerMessage) {
    transport
        .send(serde_json::to_string(message).unwrap())
        .await
        .unwrap();
}

async fn recv(transport: &mut ChannelTransport) -> ClientMessage {
    let frame = timeout(Duration::from_secs(5), transport.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("client closed the connection")
        .unwrap();
    serde_json::from_str(&frame).unwrap()
}

/// Accept the next connection and complete the handshake.
async fn accept_and_auth(
    accept_rx: &mut mpsc::UnboundedReceiver<ChannelTransport>,
) -> ChannelTransport {
    let mut transport = timeout(Duration::from_secs(5), accept_rx.recv())
        .await
        .expect("timed out waiting for connect attempt")
        .expect("connector gone");
    match recv(&mut transport).await {
        ClientMessage::Authenticate { token } => assert_eq!(token, "test-token"),
        other => panic!("expected Authenticate, got {other:?}"),
    }
    send(
        &mut transport,
        &ServerMessage::Authenticated {
            user_id: USER,
            username: "tester".into(),
        },
    )
    .await;
    transport
}

/// Expect the post-reconnect recovery probe and return its request id.
async fn expect_recovery_probe(transport: &mut ChannelTransport) -> RequestId {
    match recv(transport).await {
        ClientMessage::GetCurrentRoom { request_id } => request_id,
        other => panic!("expected GetCurrentRoom probe, got {other:?}"),
    }
}

async fn next_event(events: &mut mpsc::Receiver<CardRoomEvent>) -> CardRoomEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_status(events: &mut mpsc::Receiver<CardRoomEvent>) -> ConnectionStatus {
    loop {
        if let CardRoomEvent::ConnectionStatusChanged { status } = next_event(events).await {
            return status;
        }
    }
}

/// Answer one JoinRoom request so the client caches a room.
async fn seat_client(client: &CardRoomClient, transport: &mut ChannelTransport, id_seed: u128) {
    let join = async {
        let request_id = match recv(transport).await {
            ClientMessage::JoinRoom { request_id, .. } => request_id,
            other => panic!("expected JoinRoom, got {other:?}"),
        };
        send(
            transport,
            &ServerMessage::RoomJoined(Box::new(RoomJoinedPayload {
                request_id,
                room_state: room(id_seed),
            })),
        )
        .await;
    };
    let (result, ()) = tokio::join!(client.join_room(Uuid::from_u128(id_seed), None), join);
    assert_eq!(result.unwrap().id, Uuid::from_u128(id_seed));
}

#[tokio::test]
async fn connect_emits_connecting_then_connected() {
    let (connector, mut accept_rx) = channel_connector();
    let server = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });

    let (client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert!(client.is_connected());
    assert_eq!(client.identity().await, Some((USER, "tester".into())));

    let (_accept_rx, _transport) = server.await.unwrap();
}

#[tokio::test]
async fn request_times_out_when_server_never_acks() {
    let (connector, mut accept_rx) = channel_connector();
    let server = tokio::spawn(async move {
        let mut transport = accept_and_auth(&mut accept_rx).await;
        // Swallow the request without acking.
        let _ = recv(&mut transport).await;
        (accept_rx, transport)
    });

    let config = config().with_request_timeout(Duration::from_millis(50));
    let (client, _events) = CardRoomClient::connect(connector, config).await.unwrap();

    let err = client.join_room(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, CardRoomError::Timeout));

    let _ = server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_drop_and_adopts_server_room() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let (client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();
    let (mut accept_rx, mut transport) = handshake.await.unwrap();

    // Seat the client in room 1, then drop the connection.
    seat_client(&client, &mut transport, 1).await;
    drop(transport);

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(
        next_status(&mut events).await,
        ConnectionStatus::Reconnecting
    );

    // Second connection: the server now claims we belong to room 2.
    let mut transport = accept_and_auth(&mut accept_rx).await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    let probe_id = expect_recovery_probe(&mut transport).await;
    send(
        &mut transport,
        &ServerMessage::CurrentRoom(Box::new(CurrentRoomPayload {
            request_id: probe_id,
            room_id: Some(Uuid::from_u128(2)),
            room_state: Some(room(2)),
        })),
    )
    .await;

    match next_event(&mut events).await {
        CardRoomEvent::Reconnected {
            room_id,
            room_state,
        } => {
            assert_eq!(room_id, Uuid::from_u128(2));
            assert_eq!(room_state.id, Uuid::from_u128(2));
        }
        other => panic!("expected Reconnected, got {other:?}"),
    }
    assert_eq!(
        client.cache().await.current_room_id,
        Some(Uuid::from_u128(2))
    );
}

#[tokio::test]
async fn recovery_clears_cache_when_server_reports_no_room() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let (client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();
    let (mut accept_rx, mut transport) = handshake.await.unwrap();

    seat_client(&client, &mut transport, 1).await;
    assert!(client.cache().await.current_room_id.is_some());
    drop(transport);

    let mut transport = accept_and_auth(&mut accept_rx).await;
    let probe_id = expect_recovery_probe(&mut transport).await;
    send(
        &mut transport,
        &ServerMessage::CurrentRoom(Box::new(CurrentRoomPayload {
            request_id: probe_id,
            room_id: None,
            room_state: None,
        })),
    )
    .await;

    // The cache empties out; no Reconnected event for a cleared cache.
    timeout(Duration::from_secs(5), async {
        loop {
            if client.cache().await.current_room_id.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cache never cleared");
    assert!(!client.cache().await.is_in_game);

    // Only status transitions were emitted along the way.
    while let Ok(Some(event)) = timeout(Duration::from_millis(50), events.recv()).await {
        assert!(
            matches!(event, CardRoomEvent::ConnectionStatusChanged { .. }),
            "unexpected event {event:?}"
        );
    }
}

#[tokio::test]
async fn failed_recovery_probe_keeps_cache_and_emits_event() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let (client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();
    let (mut accept_rx, mut transport) = handshake.await.unwrap();

    seat_client(&client, &mut transport, 1).await;
    drop(transport);

    let mut transport = accept_and_auth(&mut accept_rx).await;
    let probe_id = expect_recovery_probe(&mut transport).await;
    send(
        &mut transport,
        &ServerMessage::RequestFailed {
            request_id: probe_id,
            message: "Internal server error".into(),
            error_code: None,
        },
    )
    .await;

    loop {
        match next_event(&mut events).await {
            CardRoomEvent::StateRecoveryFailed { reason } => {
                assert_eq!(reason, "Internal server error");
                break;
            }
            CardRoomEvent::ConnectionStatusChanged { .. } => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }

    // The stale cache survives for the presentation layer to inspect.
    assert_eq!(
        client.cache().await.current_room_id,
        Some(Uuid::from_u128(1))
    );
}

#[tokio::test]
async fn gives_up_after_max_attempts_and_retry_restarts() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let config = config().with_max_reconnect_attempts(2);
    let (client, mut events) = CardRoomClient::connect(connector, config).await.unwrap();
    let (mut accept_rx, transport) = handshake.await.unwrap();

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    // Refuse every reconnect attempt by dropping the server half.
    let refused = tokio::spawn(async move {
        let mut refused = 0u32;
        while let Some(transport) = accept_rx.recv().await {
            drop(transport);
            refused += 1;
        }
        refused
    });
    drop(transport);

    assert_eq!(
        next_status(&mut events).await,
        ConnectionStatus::Reconnecting
    );
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Error);

    // retry() leaves the error state and runs a fresh round of attempts.
    client.retry().unwrap();
    assert_eq!(
        next_status(&mut events).await,
        ConnectionStatus::Reconnecting
    );
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Error);

    let mut client = client;
    client.disconnect().await;
    assert!(refused.await.unwrap() >= 4);
}

#[tokio::test]
async fn requests_fail_fast_while_reconnecting() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    // Long backoff keeps the client parked in the reconnect delay.
    let config = config().with_reconnect_backoff(Duration::from_secs(60), Duration::from_secs(60));
    let (client, mut events) = CardRoomClient::connect(connector, config).await.unwrap();
    let (_accept_rx, transport) = handshake.await.unwrap();

    drop(transport);
    loop {
        if next_status(&mut events).await == ConnectionStatus::Reconnecting {
            break;
        }
    }
    assert!(!client.is_connected());

    let err = client.join_room(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, CardRoomError::NotConnected));
}

#[tokio::test]
async fn rejected_reauthentication_enters_error_state() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let (_client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();
    let (mut accept_rx, transport) = handshake.await.unwrap();
    drop(transport);

    // Reject the token on the reconnect handshake.
    let mut transport = timeout(Duration::from_secs(5), accept_rx.recv())
        .await
        .expect("no reconnect attempt")
        .expect("connector gone");
    let _ = recv(&mut transport).await;
    send(
        &mut transport,
        &ServerMessage::AuthenticationError {
            error: "token expired".into(),
            error_code: card_room::ErrorCode::AuthenticationFailed,
        },
    )
    .await;

    loop {
        if next_status(&mut events).await == ConnectionStatus::Error {
            break;
        }
    }
}

#[tokio::test]
async fn ping_probes_emit_network_quality() {
    let (connector, mut accept_rx) = channel_connector();

    let server = tokio::spawn(async move {
        let mut transport = accept_and_auth(&mut accept_rx).await;
        // Answer latency probes until the client goes away.
        loop {
            match recv(&mut transport).await {
                ClientMessage::Ping { request_id } => {
                    send(
                        &mut transport,
                        &ServerMessage::Pong {
                            request_id,
                            timestamp: 0,
                        },
                    )
                    .await;
                }
                other => panic!("expected Ping, got {other:?}"),
            }
        }
    });

    let config = config().with_ping_interval(Duration::from_millis(10));
    let (_client, mut events) = CardRoomClient::connect(connector, config).await.unwrap();

    loop {
        match next_event(&mut events).await {
            CardRoomEvent::NetworkQualityUpdate { quality, rtt_ms } => {
                assert_eq!(quality, NetworkQuality::Excellent);
                assert!(rtt_ms < 100);
                break;
            }
            CardRoomEvent::ConnectionStatusChanged { .. } => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }

    server.abort();
}

#[tokio::test]
async fn broadcasts_update_cache_and_surface_events() {
    let (connector, mut accept_rx) = channel_connector();

    let handshake = tokio::spawn(async move {
        let transport = accept_and_auth(&mut accept_rx).await;
        (accept_rx, transport)
    });
    let (client, mut events) = CardRoomClient::connect(connector, config()).await.unwrap();
    let (_accept_rx, mut transport) = handshake.await.unwrap();

    seat_client(&client, &mut transport, 1).await;

    let newcomer = PlayerEntry {
        id: Uuid::from_u128(7),
        username: "newcomer".into(),
        chips: DEFAULT_CHIPS,
        position: 1,
        is_owner: false,
        status: SeatStatus::Active,
    };
    send(
        &mut transport,
        &ServerMessage::PlayerJoined {
            player: newcomer.clone(),
            current_player_count: 2,
        },
    )
    .await;

    loop {
        match next_event(&mut events).await {
            CardRoomEvent::PlayerJoined { player, .. } => {
                assert_eq!(player.id, newcomer.id);
                break;
            }
            CardRoomEvent::ConnectionStatusChanged { .. } => continue,
            other => panic!("unexpected event {other:?}"),
        }
    }
    let cached = client.cache().await.current_room.unwrap();
    assert_eq!(cached.current_player_count, 2);
    assert!(cached.contains_player(newcomer.id));

    send(
        &mut transport,
        &ServerMessage::PlayerLeft {
            player_id: newcomer.id,
            username: "newcomer".into(),
            current_player_count: 1,
            new_owner: None,
        },
    )
    .await;

    loop {
        match next_event(&mut events).await {
            CardRoomEvent::PlayerLeft { player_id, .. } => {
                assert_eq!(player_id, newcomer.id);
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    let cached = client.cache().await.current_room.unwrap();
    assert_eq!(cached.current_player_count, 1);
    assert!(!cached.contains_player(newcomer.id));
}
