// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use websocket_rs::{
    server::WebSocketServerEvent,
    websocket::{WebSocket, WebSocketEvent},
};

use crate::integration_tests::common::{client_config, start_server};

#[tokio::test]
async fn text_message_round_trips_through_an_echo_server() {
    let (mut server, url) = start_server().await;
    let mut server_events = server.events();
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let WebSocketServerEvent::Event {
                id,
                event: WebSocketEvent::Message { text: Some(text), .. },
            } = event
            {
                server.send_text_to(id, &text).await;
            }
        }
    });

    let mut client = WebSocket::new(client_config(url));
    let mut events = client.events();
    client.start();

    assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Open));

    client.send_text("hello from the integration test").await;

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for the echo")
        .expect("event channel closed");
    match event {
        WebSocketEvent::Message { text: Some(text), binary: None, decompression_error } => {
            assert_eq!(text, "hello from the integration test");
            assert!(!decompression_error);
        }
        other => panic!("expected an echoed text message, got {other:?}"),
    }

    client.stop().await;
}
