// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use bytes::Bytes;
use websocket_rs::{
    server::WebSocketServerEvent,
    websocket::{WebSocket, WebSocketEvent},
};

use crate::integration_tests::common::{client_config, start_server};

/// A 1 MiB binary payload crosses the 32 KiB `SEND_CHUNK_SIZE` boundary many
/// times over; every non-final chunk must surface as a `Fragment` event
/// before the reassembled `Message` arrives.
#[tokio::test]
async fn large_binary_message_is_fragmented_and_reassembled() {
    let (mut server, url) = start_server().await;
    let mut server_events = server.events();
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            if let WebSocketServerEvent::Event {
                id,
                event: WebSocketEvent::Message { binary: Some(data), .. },
            } = event
            {
                server.send_binary_to(id, data).await;
            }
        }
    });

    let mut client = WebSocket::new(client_config(url));
    let mut events = client.events();
    client.start();
    assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Open));

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    client.send_binary(Bytes::from(payload.clone())).await;

    let mut fragments_seen = 0usize;
    let reassembled = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out reassembling the echoed message")
            .expect("event channel closed");
        match event {
            WebSocketEvent::Fragment => fragments_seen += 1,
            WebSocketEvent::Message { binary: Some(data), text: None, decompression_error } => {
                assert!(!decompression_error);
                break data;
            }
            other => panic!("unexpected event while reassembling: {other:?}"),
        }
    };

    assert!(fragments_seen > 0, "a 1 MiB message must be split across several frames");
    assert_eq!(reassembled.len(), payload.len());
    assert_eq!(&reassembled[..], &payload[..]);

    client.stop().await;
}
