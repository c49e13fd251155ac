// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Top-level error type aggregating every module's typed error via `#[from]`.
//! Facade/binary callers (`WebSocket`, `WebSocketServer`) surface this type
//! from their public methods; internal modules keep their own narrower
//! `thiserror` enums and only get folded into `WsError` at the boundary.

use thiserror::Error;

use crate::{
    deflate::DeflateError,
    handshake::HandshakeError,
    http::{client::HttpClientError, headers::HeaderParseError},
    transport::{frame::TransportError, tls::TlsSetupError, url::UrlParseError},
};

#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Deflate(#[from] DeflateError),

    #[error(transparent)]
    Url(#[from] UrlParseError),

    #[error(transparent)]
    Header(#[from] HeaderParseError),

    #[error(transparent)]
    Tls(#[from] TlsSetupError),

    #[error(transparent)]
    Http(#[from] HttpClientError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WsResult<T> = Result<T, WsError>;
