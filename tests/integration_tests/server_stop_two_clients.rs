// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use websocket_rs::websocket::{WebSocket, WebSocketEvent};

use crate::integration_tests::common::{client_config, start_server};

/// `SocketServer::stop` must drain every live worker, so shutting the server
/// down with two connections still open has to produce a `Close` on both.
#[tokio::test]
async fn stopping_the_server_closes_every_connected_client() {
    let (mut server, url) = start_server().await;

    let mut client_a = WebSocket::new(client_config(url.clone()));
    let mut events_a = client_a.events();
    client_a.start();
    assert!(matches!(events_a.recv().await.unwrap(), WebSocketEvent::Open));

    let mut client_b = WebSocket::new(client_config(url));
    let mut events_b = client_b.events();
    client_b.start();
    assert!(matches!(events_b.recv().await.unwrap(), WebSocketEvent::Open));

    // Give the accept loop's registry a moment to record both connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connection_count(), 2);

    server.stop().await;

    for events in [&mut events_a, &mut events_b] {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for the server-initiated close")
            .expect("event channel closed");
        assert!(matches!(event, WebSocketEvent::Close { .. }), "expected a Close event, got {event:?}");
    }

    assert_eq!(server.connection_count(), 0);
}
