// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client and server RFC 6455 upgrade handshake, bounded by a single
//! `tokio::time::timeout` composed with a `CancellationToken`.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::PerMessageDeflateConfig,
    http::headers::{HeaderMap, HeaderParseError, read_headers, read_line},
    transport::{cancellation, socket::WsStream, url::WsUrl},
    utils::generate_sec_websocket_key,
};

/// RFC 6455 §1.3's magic GUID, concatenated with the client key before
/// SHA-1/base64 to produce `Sec-WebSocket-Accept`.
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("io error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake timed out")]
    Timeout,
    #[error("handshake cancelled")]
    Cancelled,
    #[error("connection closed before the handshake completed")]
    UnexpectedEof,
    #[error("server returned a non-101 status: {status} {reason}")]
    NotSwitchingProtocols { status: u16, reason: String },
    #[error("server replied with an unsupported HTTP version: {0:?}")]
    UnsupportedHttpVersion(String),
    #[error("malformed HTTP status line: {0:?}")]
    MalformedStatusLine(String),
    #[error("response is missing a case-insensitive `Connection: Upgrade` header")]
    MissingConnectionUpgrade,
    #[error("Sec-WebSocket-Accept did not match the expected value")]
    AcceptMismatch,
    #[error("malformed HTTP request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("request is not a GET over HTTP/1.1")]
    NotAGetRequest,
    #[error("request is missing Upgrade: websocket")]
    MissingUpgradeHeader,
    #[error("request is missing Sec-WebSocket-Key")]
    MissingSecWebSocketKey,
    #[error("request has a missing or unsupported Sec-WebSocket-Version")]
    UnsupportedVersion,
    #[error("header parsing failed: {0}")]
    HeaderParse(#[from] HeaderParseError),
}

/// The outcome of negotiating `permessage-deflate` during the handshake,
/// `None` when either side did not request it or the peer declined.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedDeflate {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

pub struct ClientHandshakeOutcome {
    pub deflate: Option<NegotiatedDeflate>,
}

pub struct ServerHandshakeOutcome {
    pub request_path: String,
    pub deflate: Option<NegotiatedDeflate>,
}

fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn build_deflate_request_header(cfg: &PerMessageDeflateConfig) -> String {
    let mut parts = vec!["permessage-deflate".to_string()];
    if cfg.client_no_context_takeover {
        parts.push("client_no_context_takeover".to_string());
    }
    if cfg.server_no_context_takeover {
        parts.push("server_no_context_takeover".to_string());
    }
    parts.push(format!(
        "client_max_window_bits={}",
        sanitize_window_bits(cfg.client_max_window_bits)
    ));
    parts.push(format!(
        "server_max_window_bits={}",
        sanitize_window_bits(cfg.server_max_window_bits)
    ));
    parts.join("; ")
}

fn sanitize_window_bits(bits: u8) -> u8 {
    let clamped = bits.clamp(8, 15);
    if clamped == 8 { 9 } else { clamped }
}

fn parse_deflate_extension(value: &str) -> Option<NegotiatedDeflate> {
    let mut found = false;
    let mut negotiated = NegotiatedDeflate {
        client_no_context_takeover: false,
        server_no_context_takeover: false,
        server_max_window_bits: 15,
        client_max_window_bits: 15,
    };
    for part in value.split(';') {
        let part = part.trim();
        if part.eq_ignore_ascii_case("permessage-deflate") {
            found = true;
            continue;
        }
        if let Some((k, v)) = part.split_once('=') {
            let v: u8 = v.trim().parse().unwrap_or(15);
            match k.trim().to_ascii_lowercase().as_str() {
                "client_max_window_bits" => negotiated.client_max_window_bits = sanitize_window_bits(v),
                "server_max_window_bits" => negotiated.server_max_window_bits = sanitize_window_bits(v),
                _ => {}
            }
        } else {
            match part.to_ascii_lowercase().as_str() {
                "client_no_context_takeover" => negotiated.client_no_context_takeover = true,
                "server_no_context_takeover" => negotiated.server_no_context_takeover = true,
                _ => {}
            }
        }
    }
    found.then_some(negotiated)
}

async fn with_deadline<F, T>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, HandshakeError>
where
    F: std::future::Future<Output = Result<T, HandshakeError>>,
{
    match cancellation::with_timeout(timeout, cancel, fut).await {
        Ok(res) => res,
        Err(cancellation::Interrupted::Cancelled) => Err(HandshakeError::Cancelled),
        Err(cancellation::Interrupted::TimedOut) => Err(HandshakeError::Timeout),
    }
}

/// Performs the client side of the RFC 6455 upgrade over an already-connected
/// `stream`. On success the stream is left positioned right after the blank
/// line that terminates the response headers, ready for frame traffic.
pub async fn perform_client_handshake(
    stream: &mut WsStream,
    url: &WsUrl,
    extra_headers: &HeaderMap,
    deflate_cfg: Option<&PerMessageDeflateConfig>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ClientHandshakeOutcome, HandshakeError> {
    with_deadline(timeout, cancel, async {
        let key = generate_sec_websocket_key();

        let mut request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            path = url.path,
            host = url.host,
        );
        for (name, value) in extra_headers.iter() {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(cfg) = deflate_cfg.filter(|c| c.enabled) {
            request.push_str(&format!(
                "Sec-WebSocket-Extensions: {}\r\n",
                build_deflate_request_header(cfg)
            ));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(&mut *stream);
        let status_line = read_line(&mut reader)
            .await?
            .ok_or(HandshakeError::UnexpectedEof)?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or_else(|| HandshakeError::MalformedStatusLine(status_line.clone()))?;
        let status: u16 = parts
            .next()
            .ok_or_else(|| HandshakeError::MalformedStatusLine(status_line.clone()))?
            .parse()
            .map_err(|_| HandshakeError::MalformedStatusLine(status_line.clone()))?;
        let reason = parts.next().unwrap_or("").to_string();

        if version != "HTTP/1.1" {
            return Err(HandshakeError::UnsupportedHttpVersion(version.to_string()));
        }
        if status != 101 {
            return Err(HandshakeError::NotSwitchingProtocols { status, reason });
        }

        let headers = read_headers(&mut reader).await?;

        if !headers.contains_value_ignore_case("Connection", "Upgrade") {
            return Err(HandshakeError::MissingConnectionUpgrade);
        }

        let expected_accept = compute_accept(&key);
        let actual_accept = headers.get("Sec-WebSocket-Accept").unwrap_or("");
        if actual_accept != expected_accept {
            return Err(HandshakeError::AcceptMismatch);
        }

        let deflate = headers
            .get("Sec-WebSocket-Extensions")
            .and_then(parse_deflate_extension);

        Ok(ClientHandshakeOutcome { deflate })
    })
    .await
}

/// Performs the server side of the RFC 6455 upgrade. On a precondition
/// failure an `HTTP/1.1 <code> <reason>` response is written back to the
/// client before the error is returned.
pub async fn perform_server_handshake(
    stream: &mut WsStream,
    deflate_cfg: Option<&PerMessageDeflateConfig>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ServerHandshakeOutcome, HandshakeError> {
    with_deadline(timeout, cancel, async {
        match perform_server_handshake_inner(stream, deflate_cfg).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let (code, reason) = status_for_error(&err);
                let response = format!("HTTP/1.1 {code} {reason}\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.flush().await;
                Err(err)
            }
        }
    })
    .await
}

fn status_for_error(err: &HandshakeError) -> (u16, &'static str) {
    match err {
        HandshakeError::NotAGetRequest => (400, "Bad Request"),
        HandshakeError::MissingUpgradeHeader => (400, "Bad Request"),
        HandshakeError::MissingSecWebSocketKey => (400, "Bad Request"),
        HandshakeError::UnsupportedVersion => (426, "Upgrade Required"),
        _ => (400, "Bad Request"),
    }
}

async fn perform_server_handshake_inner(
    stream: &mut WsStream,
    deflate_cfg: Option<&PerMessageDeflateConfig>,
) -> Result<ServerHandshakeOutcome, HandshakeError> {
    let mut reader = BufReader::new(&mut *stream);
    let request_line = read_line(&mut reader)
        .await?
        .ok_or(HandshakeError::UnexpectedEof)?;

    let mut parts = request_line.split(' ');
    let method = parts
        .next()
        .ok_or_else(|| HandshakeError::MalformedRequestLine(request_line.clone()))?;
    let path = parts
        .next()
        .ok_or_else(|| HandshakeError::MalformedRequestLine(request_line.clone()))?;
    let version = parts
        .next()
        .ok_or_else(|| HandshakeError::MalformedRequestLine(request_line.clone()))?;

    if method != "GET" || version != "HTTP/1.1" {
        return Err(HandshakeError::NotAGetRequest);
    }

    let headers = read_headers(&mut reader).await?;

    if !headers.contains_value_ignore_case("Upgrade", "websocket") {
        return Err(HandshakeError::MissingUpgradeHeader);
    }
    let key = headers
        .get("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingSecWebSocketKey)?
        .to_string();
    if headers.get("Sec-WebSocket-Version") != Some("13") {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let client_wants_deflate = headers
        .get("Sec-WebSocket-Extensions")
        .and_then(parse_deflate_extension);

    let accept = compute_accept(&key);
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );

    let negotiated = match (client_wants_deflate, deflate_cfg.filter(|c| c.enabled)) {
        (Some(_), Some(cfg)) => {
            response.push_str(&format!(
                "Sec-WebSocket-Extensions: {}\r\n",
                build_deflate_request_header(cfg)
            ));
            Some(NegotiatedDeflate {
                client_no_context_takeover: cfg.client_no_context_takeover,
                server_no_context_takeover: cfg.server_no_context_takeover,
                server_max_window_bits: sanitize_window_bits(cfg.server_max_window_bits),
                client_max_window_bits: sanitize_window_bits(cfg.client_max_window_bits),
            })
        }
        _ => None,
    };
    response.push_str("\r\n");

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok(ServerHandshakeOutcome {
        request_path: path.to_string(),
        deflate: negotiated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matches_rfc6455_worked_example() {
        // RFC 6455 §1.3's own worked example.
        let accept = compute_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn window_bits_of_eight_are_promoted_to_nine() {
        assert_eq!(sanitize_window_bits(8), 9);
        assert_eq!(sanitize_window_bits(15), 15);
        assert_eq!(sanitize_window_bits(20), 15);
    }

    #[test]
    fn parses_permessage_deflate_extension_parameters() {
        let negotiated = parse_deflate_extension(
            "permessage-deflate; client_no_context_takeover; server_max_window_bits=10",
        )
        .unwrap();
        assert!(negotiated.client_no_context_takeover);
        assert!(!negotiated.server_no_context_takeover);
        assert_eq!(negotiated.server_max_window_bits, 10);
    }

    #[test]
    fn extension_header_without_permessage_deflate_is_not_negotiated() {
        assert!(parse_deflate_extension("some-other-extension").is_none());
    }
}
