// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use websocket_rs::{
    server::WebSocketServerEvent,
    websocket::{WebSocket, WebSocketEvent},
};

use crate::integration_tests::common::{client_config, start_server};

/// When the client initiates the close with an explicit code/reason, the
/// server must observe it tagged `remote = true` (the client is the remote
/// peer from the server's point of view) while the client itself observes
/// `remote = false` (it initiated the close locally).
#[tokio::test]
async fn explicit_close_code_and_reason_are_observed_on_both_sides() {
    let (mut server, url) = start_server().await;
    let mut server_events = server.events();
    let server_close = tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let WebSocketServerEvent::Event { event: WebSocketEvent::Close { code, reason, remote }, .. } = event {
                return (code, reason, remote);
            }
        }
        panic!("server event stream ended before observing a close");
    });

    let mut client = WebSocket::new(client_config(url));
    let mut events = client.events();
    client.start();
    assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Open));

    client.close(4000, "My reason").await;

    let client_close = loop {
        match events.recv().await.expect("event channel closed") {
            WebSocketEvent::Close { code, reason, remote } => break (code, reason, remote),
            _ => continue,
        }
    };
    assert_eq!(client_close, (Some(4000), "My reason".to_string(), false));

    let observed = tokio::time::timeout(Duration::from_secs(2), server_close)
        .await
        .expect("timed out waiting for the server to observe the close")
        .expect("server task panicked");
    assert_eq!(observed, (Some(4000), "My reason".to_string(), true));
}
