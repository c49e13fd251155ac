// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server side of the crate: a bare accept-loop-plus-registry
//! [`SocketServer`] and a [`WebSocketServer`] specialization that drives the
//! RFC 6455 upgrade and the same frame engine [`crate::websocket::WebSocket`]
//! uses on the client side. The connection registry is a `DashMap` keyed by
//! connection id, so lookups and removals never block the accept loop.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::{PerMessageDeflateConfig, ServerConfig},
    handshake::perform_server_handshake,
    transport::{Connection, ConnectionHandle, ConnectionOptions, IncomingMessage, socket::WsStream},
    websocket::{WebSocketEvent, to_event},
};

pub type ConnectionId = u64;

/// Bookkeeping the registry keeps per accepted connection; the worker task
/// itself flips `terminated` right before it exits.
struct ConnectionState {
    terminated: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Cadence for both the reaping sweep and the bounded wait `stop()` uses
/// while draining workers.
const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Generic accept-loop-plus-registry engine. `start` is handed a worker
/// factory invoked once per accepted connection; `SocketServer` itself knows
/// nothing about WebSocket framing, leaving that to the caller's factory.
pub struct SocketServer {
    listener: Option<TcpListener>,
    max_connections: usize,
    registry: Arc<DashMap<ConnectionId, ConnectionState>>,
    next_id: Arc<AtomicU64>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl SocketServer {
    /// Binds with `SO_REUSEADDR` set before the socket is handed to Tokio, so
    /// a restart doesn't fail with "address already in use" while the old
    /// socket lingers in `TIME_WAIT`.
    pub async fn bind(host: &str, port: u16, backlog: u32, max_connections: usize) -> std::io::Result<Self> {
        let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid host/port")
        })?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        let listener = TcpListener::from_std(socket.into())?;

        Ok(Self {
            listener: Some(listener),
            max_connections,
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            cancel: CancellationToken::new(),
            accept_task: None,
            sweep_task: None,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener
            .as_ref()
            .expect("local_addr called after start")
            .local_addr()
    }

    /// Spawns the accept loop and the reaping sweep. `worker` is invoked
    /// with each accepted raw TCP stream, its peer address, a
    /// connection-scoped child of the server's cancellation token, and this
    /// connection's id. `SocketServer` itself stays oblivious to TLS as well
    /// as WebSocket framing — wrapping the stream (plain or TLS) is the
    /// worker's job.
    pub fn start<F, Fut>(&mut self, worker: F)
    where
        F: Fn(tokio::net::TcpStream, SocketAddr, CancellationToken, ConnectionId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.accept_task.is_some() {
            return;
        }
        let listener = self.listener.take().expect("SocketServer::start called twice");
        let registry = self.registry.clone();
        let next_id = self.next_id.clone();
        let max_connections = self.max_connections;
        let cancel = self.cancel.clone();
        let worker = Arc::new(worker);

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                if registry.len() >= max_connections {
                                    warn!(%addr, max_connections, "rejecting connection: server at capacity");
                                    drop(stream);
                                    continue;
                                }
                                let _ = stream.set_nodelay(true);
                                let id = next_id.fetch_add(1, Ordering::Relaxed);
                                let terminated = Arc::new(AtomicBool::new(false));
                                let terminated_for_worker = terminated.clone();
                                let conn_cancel = cancel.child_token();
                                let fut = worker(stream, addr, conn_cancel, id);
                                let handle = tokio::spawn(async move {
                                    fut.await;
                                    terminated_for_worker.store(true, Ordering::Relaxed);
                                });
                                registry.insert(id, ConnectionState { terminated, handle });
                            }
                            Err(err) => {
                                warn!(error = %err, "accept failed");
                            }
                        }
                    }
                }
            }
        }));

        let sweep_registry = self.registry.clone();
        self.sweep_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                sweep_registry.retain(|_, state| !state.terminated.load(Ordering::Relaxed));
            }
        }));
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Cancels every worker, drains the registry by awaiting each worker's
    /// `JoinHandle`, then tears down the sweep and accept tasks.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let ids: Vec<ConnectionId> = self.registry.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, state)) = self.registry.remove(&id) {
                let _ = state.handle.await;
            }
        }

        if let Some(sweep) = self.sweep_task.take() {
            sweep.abort();
        }
        if let Some(accept) = self.accept_task.take() {
            let _ = accept.await;
        }
    }
}

/// A message delivered out of a [`WebSocketServer`], tagged with which
/// connection produced it.
#[derive(Debug, Clone)]
pub enum WebSocketServerEvent {
    Connected { id: ConnectionId, path: String },
    Event { id: ConnectionId, event: WebSocketEvent },
    Disconnected { id: ConnectionId },
}

/// WebSocket specialization of [`SocketServer`]: each worker runs the
/// server-side handshake then drives a [`Connection`] the same way the
/// client facade does, fanning reassembled messages out over one shared
/// event channel tagged by connection id.
pub struct WebSocketServer {
    inner: SocketServer,
    events_tx: mpsc::UnboundedSender<WebSocketServerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<WebSocketServerEvent>>,
    handles: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
}

impl WebSocketServer {
    /// Binds a listener for `cfg`. If `cfg.tls` names a certificate/key
    /// pair, every accepted connection is upgraded to `wss://` with a
    /// `tokio_rustls::TlsAcceptor` before the RFC 6455 handshake runs;
    /// otherwise connections stay plain TCP (`ws://`).
    pub async fn bind(cfg: &ServerConfig) -> std::io::Result<Self> {
        let inner = SocketServer::bind(&cfg.host, cfg.port, cfg.backlog, cfg.max_connections).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tls_acceptor = cfg
            .tls
            .as_ref()
            .map(crate::transport::tls::build_server_acceptor)
            .transpose()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            inner,
            events_tx,
            events_rx: Some(events_rx),
            handles: Arc::new(DashMap::new()),
            tls_acceptor,
        })
    }

    /// Sends a text message to one connected client by id; a no-op if the
    /// connection is unknown or already gone.
    pub async fn send_text_to(&self, id: ConnectionId, text: &str) -> bool {
        let handle = self.handles.get(&id).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => {
                handle.send_text(text).await;
                true
            }
            None => false,
        }
    }

    /// Sends a binary message to one connected client by id; a no-op if the
    /// connection is unknown or already gone.
    pub async fn send_binary_to(&self, id: ConnectionId, data: Bytes) -> bool {
        let handle = self.handles.get(&id).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => {
                handle.send_binary(data).await;
                true
            }
            None => false,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connection_count()
    }

    /// Takes ownership of the event stream. Must be called (at most once)
    /// before or after [`Self::start`].
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<WebSocketServerEvent> {
        self.events_rx
            .take()
            .expect("WebSocketServer::events() called more than once")
    }

    /// Spawns the accept loop. `handshake_timeout` and `deflate_cfg` are
    /// applied to every accepted connection identically; per-connection
    /// negotiation still happens inside `perform_server_handshake`.
    /// `enable_pong` controls whether an accepted connection auto-replies to
    /// the client's heartbeat PING (disabling it is how a test or an
    /// operator simulates a peer that has stopped answering heartbeats).
    pub fn start(&mut self, handshake_timeout: Duration, deflate_cfg: Option<PerMessageDeflateConfig>, enable_pong: bool) {
        let events_tx = self.events_tx.clone();
        let handles = self.handles.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        self.inner.start(move |tcp: tokio::net::TcpStream, addr: SocketAddr, cancel: CancellationToken, id: ConnectionId| {
            let events_tx = events_tx.clone();
            let handles = handles.clone();
            let deflate_cfg = deflate_cfg;
            let tls_acceptor = tls_acceptor.clone();
            async move {
                let mut stream = match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(tcp).await {
                        Ok(tls) => WsStream::TlsServer(Box::new(tls)),
                        Err(err) => {
                            debug!(%addr, error = %err, "tls accept failed");
                            return;
                        }
                    },
                    None => WsStream::Plain(tcp),
                };
                let outcome = match perform_server_handshake(
                    &mut stream,
                    deflate_cfg.as_ref(),
                    handshake_timeout,
                    &cancel,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        debug!(%addr, error = %err, "server handshake failed");
                        return;
                    }
                };

                let options = ConnectionOptions {
                    is_server: true,
                    enable_pong,
                    deflate_enabled: outcome.deflate.is_some(),
                    server_no_context_takeover: outcome
                        .deflate
                        .map(|d| d.server_no_context_takeover)
                        .unwrap_or(false),
                    client_no_context_takeover: outcome
                        .deflate
                        .map(|d| d.client_no_context_takeover)
                        .unwrap_or(false),
                    server_max_window_bits: outcome.deflate.map(|d| d.server_max_window_bits).unwrap_or(15),
                    client_max_window_bits: outcome.deflate.map(|d| d.client_max_window_bits).unwrap_or(15),
                    ..ConnectionOptions::default()
                };

                info!(%addr, path = %outcome.request_path, "websocket accepted");
                let _ = events_tx.send(WebSocketServerEvent::Connected {
                    id,
                    path: outcome.request_path,
                });

                let connection = Connection::new(stream, options, cancel);
                handles.insert(id, connection.handle());
                let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
                let run_task = tokio::spawn(connection.run(inbound_tx));

                while let Some(message) = inbound_rx.recv().await {
                    let is_close = matches!(message, IncomingMessage::Close { .. });
                    let _ = events_tx.send(WebSocketServerEvent::Event {
                        id,
                        event: to_event(message),
                    });
                    if is_close {
                        break;
                    }
                }
                let _ = run_task.await;
                handles.remove(&id);

                let _ = events_tx.send(WebSocketServerEvent::Disconnected { id });
            }
        });
    }

    /// Sends every connected client a normal-closure CLOSE frame, gives the
    /// closing handshake a moment to complete in-band, then cancels and
    /// drains whatever workers are still around.
    pub async fn stop(&mut self) {
        for entry in self.handles.iter() {
            entry.value().send_close(1000, "Normal closure").await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.stop().await;
    }
}
