// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{TlsVerifyPolicy, YesNo};

/// Root configuration document. Mirrors the shape of the YAML file loaded by
/// [`Config::load_from_file`]: a `websocket:` section driving [`WebSocket`](
/// crate::websocket::WebSocket) instances, an optional `server:` section for
/// [`SocketServer`](crate::server::SocketServer) binaries, and an optional
/// `http_client:` section for [`HttpClient`](crate::http::client::HttpClient)
/// defaults.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

/// Per-connection WebSocket configuration, keyed to the External Interfaces
/// table: `url`, `extra_headers`, heartbeat cadence, per-message-deflate
/// negotiation, reconnection policy, handshake timeout, and TLS options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WebSocketConfig {
    /// Target URL; scheme (`ws`/`wss`) selects plain TCP vs TLS.
    #[serde(rename = "Url")]
    pub url: String,

    /// Additional headers sent with the client upgrade request.
    #[serde(default, rename = "ExtraHeaders")]
    pub extra_headers: HashMap<String, String>,

    #[serde(rename = "Heartbeat")]
    pub heartbeat: HeartbeatConfig,

    #[serde(default, rename = "PerMessageDeflate")]
    pub per_message_deflate: PerMessageDeflateConfig,

    #[serde(rename = "Reconnection")]
    pub reconnection: ReconnectionConfig,

    /// Upgrade deadline in seconds (default 60, per the source).
    #[serde(rename = "HandshakeTimeoutSecs")]
    pub handshake_timeout_secs: u64,

    #[serde(default, rename = "Tls")]
    pub tls: Option<TlsConfig>,
}

/// PING cadence and PONG auto-reply policy. `ping_interval_secs <= 0`
/// disables the interval heartbeat; `ping_timeout_secs <= 0` disables the
/// missing-PONG deadline.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    #[serde(rename = "PingIntervalSecs")]
    pub ping_interval_secs: i64,
    #[serde(rename = "PingTimeoutSecs")]
    pub ping_timeout_secs: i64,
    #[serde(default = "default_true", rename = "EnablePong")]
    pub enable_pong: bool,
}

fn default_true() -> bool {
    true
}

/// RFC 7692 permessage-deflate negotiation parameters.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct PerMessageDeflateConfig {
    #[serde(default, rename = "Enabled")]
    pub enabled: bool,
    #[serde(default, rename = "ClientNoContextTakeover")]
    pub client_no_context_takeover: bool,
    #[serde(default, rename = "ServerNoContextTakeover")]
    pub server_no_context_takeover: bool,
    #[serde(default = "default_max_window_bits", rename = "ServerMaxWindowBits")]
    pub server_max_window_bits: u8,
    #[serde(default = "default_max_window_bits", rename = "ClientMaxWindowBits")]
    pub client_max_window_bits: u8,
}

fn default_max_window_bits() -> u8 {
    15
}

impl Default for PerMessageDeflateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_no_context_takeover: false,
            server_no_context_takeover: false,
            server_max_window_bits: default_max_window_bits(),
            client_max_window_bits: default_max_window_bits(),
        }
    }
}

/// Auto-reconnect policy driving the exponential backoff of
/// [`crate::websocket::WebSocket`].
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct ReconnectionConfig {
    #[serde(rename = "AutomaticReconnection")]
    pub automatic_reconnection: YesNo,
    #[serde(
        default = "default_max_wait_ms",
        rename = "MaxWaitBetweenReconnectionRetriesMs"
    )]
    pub max_wait_between_reconnection_retries_ms: u64,
}

fn default_max_wait_ms() -> u64 {
    10_000
}

/// TLS options for `wss://` connections. `ca` follows the sentinel rules in
/// [`TlsVerifyPolicy`].
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default, rename = "CertFile")]
    pub cert_file: Option<String>,
    #[serde(default, rename = "KeyFile")]
    pub key_file: Option<String>,
    #[serde(default, rename = "Ca")]
    pub ca: TlsVerifyPolicy,
    #[serde(default, rename = "CipherList")]
    pub cipher_list: Option<String>,
    #[serde(default, rename = "Sni")]
    pub sni: Option<String>,
}

/// Socket server bind parameters.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host", rename = "Host")]
    pub host: String,
    #[serde(default = "default_port", rename = "Port")]
    pub port: u16,
    #[serde(default = "default_backlog", rename = "Backlog")]
    pub backlog: u32,
    #[serde(default = "default_max_connections", rename = "MaxConnections")]
    pub max_connections: usize,
    #[serde(default, rename = "Tls")]
    pub tls: Option<TlsConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_backlog() -> u32 {
    5
}
fn default_max_connections() -> usize {
    32
}

/// Defaults and limits for [`crate::http::client::HttpClient`] requests.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HttpClientConfig {
    #[serde(default = "default_user_agent", rename = "UserAgent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects", rename = "MaxRedirects")]
    pub max_redirects: u32,
    #[serde(default = "default_connect_timeout_secs", rename = "ConnectTimeoutSecs")]
    pub connect_timeout_secs: u64,
    #[serde(
        default = "default_transfer_timeout_secs",
        rename = "TransferTimeoutSecs"
    )]
    pub transfer_timeout_secs: u64,
}

fn default_user_agent() -> String {
    "ixwebsocket/1.0.0".to_string()
}
fn default_max_redirects() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    60
}
fn default_transfer_timeout_secs() -> u64 {
    60
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            connect_timeout_secs: default_connect_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.websocket.url.is_empty(), "websocket.url must not be empty");

        sanitize_window_bits(&mut self.websocket.per_message_deflate.server_max_window_bits);
        sanitize_window_bits(&mut self.websocket.per_message_deflate.client_max_window_bits);

        if let Some(server) = &self.server {
            ensure!(server.max_connections >= 1, "server.max_connections must be >= 1");
        }

        ensure!(
            self.http_client.max_redirects <= 32,
            "http_client.max_redirects must be <= 32"
        );

        Ok(())
    }
}

/// zlib/deflate has a bug with windowBits == 8, so silently promote it to 9.
/// See https://bugs.chromium.org/p/chromium/issues/detail?id=691074
fn sanitize_window_bits(bits: &mut u8) {
    *bits = (*bits).clamp(8, 15);
    if *bits == 8 {
        *bits = 9;
    }
}
