// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};

use crate::transport::frame::TransportError;

/// Unifies a plain `TcpStream` and a `rustls` `TlsStream` behind one type so
/// the rest of the transport never has to branch on `ws` vs `wss`. The enum
/// plays the role of a single concrete stream type for the reader/writer
/// code built on top of it.
pub enum WsStream {
    Plain(TcpStream),
    TlsClient(Box<ClientTlsStream<TcpStream>>),
    TlsServer(Box<ServerTlsStream<TcpStream>>),
}

impl WsStream {
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            WsStream::Plain(s) => s.peer_addr(),
            WsStream::TlsClient(s) => s.get_ref().0.peer_addr(),
            WsStream::TlsServer(s) => s.get_ref().0.peer_addr(),
        }
    }

    fn set_nodelay(&self, nodelay: bool) -> std::io::Result<()> {
        match self {
            WsStream::Plain(s) => s.set_nodelay(nodelay),
            WsStream::TlsClient(s) => s.get_ref().0.set_nodelay(nodelay),
            WsStream::TlsServer(s) => s.get_ref().0.set_nodelay(nodelay),
        }
    }
}

/// Connects a plain TCP stream to `addr` and enables `TCP_NODELAY`, matching
/// the low-latency framing assumption the rest of the transport is built on.
pub async fn connect_tcp(addr: SocketAddr) -> Result<WsStream, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    let stream = WsStream::Plain(stream);
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            WsStream::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            WsStream::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            WsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            WsStream::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            WsStream::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            WsStream::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
            WsStream::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            WsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            WsStream::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            WsStream::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
