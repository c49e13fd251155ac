// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! User-visible WebSocket client facade: `start()`/`stop()` lifecycle,
//! auto-reconnect with exponential backoff, and a typed event stream
//! delivered over a bounded channel.

use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    cfg::config::WebSocketConfig,
    handshake::{HandshakeError, perform_client_handshake},
    http::headers::HeaderMap,
    transport::{
        Connection, ConnectionHandle, ConnectionOptions, IncomingMessage, WireSendOutcome,
        cancellation, dns,
        socket::{WsStream, connect_tcp},
        tls::build_client_connector,
        url::parse_ws_url,
    },
};

/// Process-wide traffic tracker hook, set at most once before any
/// `WebSocket` is constructed.
static TRAFFIC_TRACKER: OnceCell<Box<dyn Fn(usize, bool) + Send + Sync>> = OnceCell::new();

pub fn set_traffic_tracker<F>(tracker: F)
where
    F: Fn(usize, bool) + Send + Sync + 'static,
{
    let _ = TRAFFIC_TRACKER.set(Box::new(tracker));
}

pub(crate) fn track_traffic(bytes: usize, incoming: bool) {
    if let Some(tracker) = TRAFFIC_TRACKER.get() {
        tracker(bytes, incoming);
    }
}

#[derive(Debug, Clone)]
pub enum WebSocketEvent {
    Open,
    Message {
        text: Option<String>,
        binary: Option<Bytes>,
        decompression_error: bool,
    },
    /// A non-terminal part of a still-assembling fragmented message; the
    /// completed message follows as a later `Message` event.
    Fragment,
    Ping(Bytes),
    Pong(Bytes),
    Close {
        code: Option<u16>,
        reason: String,
        remote: bool,
    },
    Error {
        retries: u32,
        wait_time: Duration,
        http_status: Option<u16>,
        reason: String,
    },
}

/// Outcome of a `send_*`/`ping` call, mirroring `IXWebSocketSendInfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketSendInfo {
    pub success: bool,
    pub compression_error: bool,
    pub payload_size: usize,
    pub wire_size: usize,
}

impl From<WireSendOutcome> for WebSocketSendInfo {
    fn from(outcome: WireSendOutcome) -> Self {
        Self {
            success: true,
            compression_error: outcome.compression_error,
            payload_size: outcome.payload_size,
            wire_size: outcome.wire_size,
        }
    }
}

/// `IXExponentialBackoff::calculateRetryWaitMilliseconds` verbatim: doubling
/// every retry up to 2^25 * 100ms, after which the cap alone applies.
fn backoff_wait(retries: u32, max_wait: Duration) -> Duration {
    let wait_ms: u64 = if retries < 26 { 2u64.pow(retries) * 100 } else { 0 };
    let max_ms = max_wait.as_millis() as u64;
    if wait_ms == 0 || wait_ms > max_ms {
        max_wait
    } else {
        Duration::from_millis(wait_ms)
    }
}

/// One background driver task per instance, owning the live (or
/// not-yet-established) [`Connection`] and running the reconnect loop.
pub struct WebSocket {
    cfg: WebSocketConfig,
    handle: std::sync::Arc<Mutex<Option<ConnectionHandle>>>,
    events_tx: mpsc::UnboundedSender<WebSocketEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<WebSocketEvent>>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl WebSocket {
    pub fn new(cfg: WebSocketConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            handle: std::sync::Arc::new(Mutex::new(None)),
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            driver: None,
        }
    }

    /// Takes ownership of the event stream. Must be called (at most once)
    /// before or after [`Self::start`]; events queue in the unbounded
    /// channel either way.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<WebSocketEvent> {
        self.events_rx
            .take()
            .expect("WebSocket::events() called more than once")
    }

    /// Spawns the driver task. Idempotent: calling `start()` twice without an
    /// intervening `stop()` is a no-op.
    pub fn start(&mut self) {
        if self.driver.is_some() {
            return;
        }
        let cfg = self.cfg.clone();
        let handle_slot = self.handle.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();
        self.driver = Some(tokio::spawn(async move {
            drive(cfg, handle_slot, events_tx, cancel).await;
        }));
    }

    /// Initiates the closing handshake with an explicit code/reason and
    /// lets it run in-band: the driver observes its own locally-initiated
    /// close through the usual `Close` event once the peer echoes back (or
    /// once the closing deadline elapses) and then winds itself down, the
    /// same way a connection closed by the peer would. Does not itself wait
    /// for that to happen; call [`Self::stop`] afterwards to join the
    /// driver task.
    pub async fn close(&self, code: u16, reason: &str) {
        if let Some(handle) = self.handle.lock().await.as_ref() {
            handle.send_close(code, reason).await;
        }
    }

    /// Requests the current connection close with the normal-closure code,
    /// gives the in-band closing handshake a moment to complete, then
    /// cancels and awaits the driver task's completion — the async analogue
    /// of the source's thread join.
    pub async fn stop(&mut self) {
        self.close(1000, "Normal closure").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }

    pub async fn send_text(&self, text: &str) -> WebSocketSendInfo {
        self.send_with(|handle| {
            let text = text.to_string();
            Box::pin(async move { handle.send_text(&text).await })
        })
        .await
    }

    pub async fn send_binary(&self, data: Bytes) -> WebSocketSendInfo {
        self.send_with(|handle| Box::pin(async move { handle.send_binary(data).await }))
            .await
    }

    pub async fn ping(&self, payload: Bytes) -> WebSocketSendInfo {
        let guard = self.handle.lock().await;
        match guard.as_ref() {
            Some(handle) => {
                handle.send_ping(payload.clone()).await;
                track_traffic(payload.len(), false);
                WebSocketSendInfo {
                    success: true,
                    compression_error: false,
                    payload_size: payload.len(),
                    wire_size: payload.len() + 2,
                }
            }
            None => WebSocketSendInfo::default(),
        }
    }

    async fn send_with<F>(&self, f: F) -> WebSocketSendInfo
    where
        F: FnOnce(
            ConnectionHandle,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = WireSendOutcome> + Send>>,
    {
        let handle = { self.handle.lock().await.clone() };
        match handle {
            Some(handle) => {
                let outcome = f(handle).await;
                track_traffic(outcome.wire_size, false);
                outcome.into()
            }
            None => WebSocketSendInfo::default(),
        }
    }
}

/// The reconnect + drive loop that runs inside the spawned driver task.
async fn drive(
    cfg: WebSocketConfig,
    handle_slot: std::sync::Arc<Mutex<Option<ConnectionHandle>>>,
    events_tx: mpsc::UnboundedSender<WebSocketEvent>,
    cancel: CancellationToken,
) {
    let max_wait = Duration::from_millis(cfg.reconnection.max_wait_between_reconnection_retries_ms);
    let mut retries: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match connect_once(&cfg, &cancel).await {
            Ok((connection, handle)) => {
                retries = 0;
                *handle_slot.lock().await = Some(handle);
                let _ = events_tx.send(WebSocketEvent::Open);

                let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
                let conn_cancel = connection.cancellation_token();
                let run_task = tokio::spawn(connection.run(inbound_tx));

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            conn_cancel.cancel();
                            let _ = run_task.await;
                            *handle_slot.lock().await = None;
                            return;
                        }
                        message = inbound_rx.recv() => {
                            match message {
                                Some(message) => dispatch(message, &events_tx),
                                None => break,
                            }
                        }
                    }
                }

                *handle_slot.lock().await = None;
                if !cfg.reconnection.automatic_reconnection.as_bool() {
                    return;
                }
            }
            Err((reason, http_status)) => {
                let wait_time = backoff_wait(retries, max_wait);
                let _ = events_tx.send(WebSocketEvent::Error {
                    retries,
                    wait_time,
                    http_status,
                    reason,
                });
                if !cfg.reconnection.automatic_reconnection.as_bool() {
                    return;
                }
                retries = retries.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait_time) => {}
                }
            }
        }
    }
}

/// Maps a reassembled transport message onto the public event type, tracking
/// traffic for the inbound direction on the way.
pub(crate) fn to_event(message: IncomingMessage) -> WebSocketEvent {
    match message {
        IncomingMessage::Text { text, decompression_error } => {
            track_traffic(text.len(), true);
            WebSocketEvent::Message {
                text: Some(text),
                binary: None,
                decompression_error,
            }
        }
        IncomingMessage::Binary { data, decompression_error } => {
            track_traffic(data.len(), true);
            WebSocketEvent::Message {
                text: None,
                binary: Some(data),
                decompression_error,
            }
        }
        IncomingMessage::Fragment => WebSocketEvent::Fragment,
        IncomingMessage::Ping(payload) => WebSocketEvent::Ping(payload),
        IncomingMessage::Pong(payload) => WebSocketEvent::Pong(payload),
        IncomingMessage::Close { code, reason, remote } => WebSocketEvent::Close { code, reason, remote },
    }
}

pub(crate) fn dispatch(message: IncomingMessage, events_tx: &mpsc::UnboundedSender<WebSocketEvent>) {
    let _ = events_tx.send(to_event(message));
}

/// One connection attempt: resolve, connect (TLS or plain), perform the
/// client handshake, and build the driving [`Connection`]. On failure
/// returns a human-readable reason plus the HTTP status if the handshake got
/// that far.
async fn connect_once(
    cfg: &WebSocketConfig,
    cancel: &CancellationToken,
) -> Result<(Connection, ConnectionHandle), (String, Option<u16>)> {
    let url = parse_ws_url(&cfg.url).map_err(|e| (e.to_string(), None))?;

    let addr = dns::resolve(&url.host, url.port, cancel)
        .await
        .map_err(|e| (e.to_string(), None))?;

    // The in-progress TCP/TLS connect races the cancellation token directly
    // rather than polling it every 50ms, the async equivalent of the
    // source's periodic select-based cancellation of a pending `connect`.
    let mut stream = match cancellation::cancellable(cancel, connect_stream(&url, cfg.tls.as_ref(), addr)).await {
        Ok(res) => res?,
        Err(_) => return Err(("connect cancelled".to_string(), None)),
    };

    let mut extra_headers = HeaderMap::new();
    for (name, value) in &cfg.extra_headers {
        extra_headers.insert(name.clone(), value.clone());
    }

    let handshake_timeout = Duration::from_secs(cfg.handshake_timeout_secs);
    let deflate_cfg = cfg.per_message_deflate.enabled.then_some(&cfg.per_message_deflate);
    let outcome = perform_client_handshake(&mut stream, &url, &extra_headers, deflate_cfg, handshake_timeout, cancel)
        .await
        .map_err(|e| (e.to_string(), http_status_of(&e)))?;

    let ping_interval = (cfg.heartbeat.ping_interval_secs > 0)
        .then(|| Duration::from_secs(cfg.heartbeat.ping_interval_secs as u64));
    let ping_timeout = (cfg.heartbeat.ping_timeout_secs > 0)
        .then(|| Duration::from_secs(cfg.heartbeat.ping_timeout_secs as u64));

    let options = ConnectionOptions {
        is_server: false,
        max_payload_len: 64 * 1024 * 1024,
        ping_interval,
        ping_timeout,
        enable_pong: cfg.heartbeat.enable_pong,
        deflate_enabled: outcome.deflate.is_some(),
        server_no_context_takeover: outcome.deflate.map(|d| d.server_no_context_takeover).unwrap_or(false),
        client_no_context_takeover: outcome.deflate.map(|d| d.client_no_context_takeover).unwrap_or(false),
        server_max_window_bits: outcome.deflate.map(|d| d.server_max_window_bits).unwrap_or(15),
        client_max_window_bits: outcome.deflate.map(|d| d.client_max_window_bits).unwrap_or(15),
    };

    let connection = Connection::new(stream, options, CancellationToken::new());
    let handle = connection.handle();
    debug!(url = %cfg.url, "websocket connected");
    info!(url = %cfg.url, deflate = outcome.deflate.is_some(), "handshake complete");
    Ok((connection, handle))
}

async fn connect_stream(
    url: &crate::transport::url::WsUrl,
    tls_cfg: Option<&crate::cfg::config::TlsConfig>,
    addr: std::net::SocketAddr,
) -> Result<WsStream, (String, Option<u16>)> {
    if url.tls {
        let connector = build_client_connector(tls_cfg).map_err(|e| (e.to_string(), None))?;
        let tcp = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| (e.to_string(), None))?;
        let domain = rustls_pki_types::ServerName::try_from(url.host.clone())
            .map_err(|_| ("invalid DNS name in url".to_string(), None))?;
        let tls_stream = connector
            .connect(domain, tcp)
            .await
            .map_err(|e| (e.to_string(), None))?;
        Ok(WsStream::TlsClient(Box::new(tls_stream)))
    } else {
        connect_tcp(addr).await.map_err(|e| (e.to_string(), None))
    }
}

fn http_status_of(err: &HandshakeError) -> Option<u16> {
    match err {
        HandshakeError::NotSwitchingProtocols { status, .. } => Some(*status),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let max = Duration::from_millis(10_000);
        assert_eq!(backoff_wait(0, max), Duration::from_millis(100));
        assert_eq!(backoff_wait(1, max), Duration::from_millis(200));
        assert_eq!(backoff_wait(3, max), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped_at_max_wait() {
        let max = Duration::from_millis(1_000);
        assert_eq!(backoff_wait(10, max), max);
    }

    #[test]
    fn backoff_past_retry_twenty_six_uses_the_cap_directly() {
        let max = Duration::from_millis(5_000);
        assert_eq!(backoff_wait(30, max), max);
    }
}
