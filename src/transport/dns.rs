// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::SocketAddr;

use tokio::net::lookup_host;
use tokio_util::sync::CancellationToken;

use crate::transport::{cancellation, frame::TransportError};

/// Resolves `host:port` to a concrete socket address, cancellable via
/// `token`. No resolver state is retained across calls — each lookup is a
/// one-shot `getaddrinfo`-equivalent, same as the reference crate's
/// connection-scoped DNS usage.
pub async fn resolve(
    host: &str,
    port: u16,
    token: &CancellationToken,
) -> Result<SocketAddr, TransportError> {
    let mut addrs = cancellation::cancellable(token, lookup_host((host, port)))
        .await
        .map_err(|_| TransportError::Cancelled)??;

    addrs.next().ok_or_else(|| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses found for {host}:{port}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let token = CancellationToken::new();
        let addr = resolve("localhost", 80, &token).await.unwrap();
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let err = resolve("localhost", 80, &token).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
