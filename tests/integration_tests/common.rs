// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, time::Duration};

use websocket_rs::{
    cfg::{
        config::{HeartbeatConfig, PerMessageDeflateConfig, ReconnectionConfig, ServerConfig, WebSocketConfig},
        enums::YesNo,
    },
    server::WebSocketServer,
};

pub fn heartbeat_disabled() -> HeartbeatConfig {
    HeartbeatConfig {
        ping_interval_secs: 0,
        ping_timeout_secs: 0,
        enable_pong: true,
    }
}

pub fn client_config(url: String) -> WebSocketConfig {
    WebSocketConfig {
        url,
        extra_headers: HashMap::new(),
        heartbeat: heartbeat_disabled(),
        per_message_deflate: PerMessageDeflateConfig::default(),
        reconnection: ReconnectionConfig {
            automatic_reconnection: YesNo::No,
            max_wait_between_reconnection_retries_ms: 1_000,
        },
        handshake_timeout_secs: 5,
        tls: None,
    }
}

/// Binds a server on an OS-assigned loopback port and starts its accept
/// loop, returning the bound server plus a `ws://` url clients can dial.
pub async fn start_server() -> (WebSocketServer, String) {
    start_server_with_pong(true).await
}

/// As [`start_server`], but lets the caller disable the server's PING
/// auto-reply to simulate a peer that has stopped answering heartbeats.
pub async fn start_server_with_pong(enable_pong: bool) -> (WebSocketServer, String) {
    let cfg = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        backlog: 16,
        max_connections: 32,
        tls: None,
    };
    let mut server = WebSocketServer::bind(&cfg).await.expect("bind loopback server");
    let addr = server.local_addr().expect("local_addr");
    server.start(Duration::from_secs(5), None, enable_pong);
    (server, format!("ws://{addr}"))
}
