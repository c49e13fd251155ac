// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::{self};
use tokio_util::sync::CancellationToken;

/// Why a [`cancellable`]/[`with_timeout`] race didn't return the wrapped
/// future's own output. Callers map this onto their local error type, since
/// every suspension point in this crate (DNS, handshake I/O, TCP/TLS connect)
/// surfaces cancellation/timeout through its own `thiserror` enum rather than
/// a shared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    TimedOut,
}

/// Runs `fut` to completion unless `token` is cancelled first.
///
/// Mirrors the reference crate's `client::common::io_with_timeout`, minus the
/// timeout leg — used where a caller only needs to race against shutdown,
/// not against a deadline. Used by `dns::resolve` and `websocket::connect_once`.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T, Interrupted>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = token.cancelled() => Err(Interrupted::Cancelled),
        out = fut => Ok(out),
    }
}

/// Runs `fut` to completion unless `token` is cancelled or `timeout` elapses
/// first. Direct analogue of `io_with_timeout`. Used by
/// `handshake::with_deadline`.
pub async fn with_timeout<F, T>(
    timeout: Duration,
    token: &CancellationToken,
    fut: F,
) -> Result<T, Interrupted>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = token.cancelled() => Err(Interrupted::Cancelled),
        res = time::timeout(timeout, fut) => res.map_err(|_| Interrupted::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn cancellable_returns_value_when_not_cancelled() {
        let token = CancellationToken::new();
        let out = cancellable(&token, async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn cancellable_short_circuits_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let out = cancellable(&token, std::future::pending::<()>()).await;
        assert!(matches!(out, Err(Interrupted::Cancelled)));
    }

    #[tokio::test]
    async fn with_timeout_errors_when_future_never_resolves() {
        let token = CancellationToken::new();
        let out = with_timeout(
            Duration::from_millis(10),
            &token,
            std::future::pending::<()>(),
        )
        .await;
        assert!(matches!(out, Err(Interrupted::TimedOut)));
    }
}
