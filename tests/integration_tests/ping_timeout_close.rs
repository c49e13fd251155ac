// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use websocket_rs::{
    cfg::config::{HeartbeatConfig, ReconnectionConfig},
    cfg::enums::YesNo,
    websocket::{WebSocket, WebSocketEvent},
};

use crate::integration_tests::common::{client_config, start_server_with_pong};

/// The server in this test has its PING auto-reply disabled, so a client
/// with a tighter `ping_timeout` than its run time must self-close with
/// `1011`/"Ping timeout" well before the test's own deadline.
#[tokio::test]
async fn missed_pong_deadline_closes_with_internal_error_code() {
    let (mut server, url) = start_server_with_pong(false).await;
    let mut server_events = server.events();
    tokio::spawn(async move { while server_events.recv().await.is_some() {} });

    let mut cfg = client_config(url);
    cfg.heartbeat = HeartbeatConfig {
        ping_interval_secs: 1,
        ping_timeout_secs: 2,
        enable_pong: false,
    };
    cfg.reconnection = ReconnectionConfig {
        automatic_reconnection: YesNo::No,
        max_wait_between_reconnection_retries_ms: 1_000,
    };

    let mut client = WebSocket::new(cfg);
    let mut events = client.events();
    client.start();
    assert!(matches!(events.recv().await.unwrap(), WebSocketEvent::Open));

    let event = tokio::time::timeout(Duration::from_millis(2_500), async {
        loop {
            match events.recv().await.expect("event channel closed") {
                WebSocketEvent::Close { code, reason, remote } => break (code, reason, remote),
                _ => continue,
            }
        }
    })
    .await
    .expect("client did not close after the missed pong deadline");

    assert_eq!(event, (Some(1011), "Ping timeout".to_string(), false));
}
