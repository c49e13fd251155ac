// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single-shot synchronous-over-async HTTP request/response built directly on
//! the transport's socket and header layers. Grounded on `IXHttpClient.cpp`;
//! shares `transport::socket::WsStream` and `http::headers::HeaderMap` with
//! the WebSocket upgrade handshake rather than pulling in a general-purpose
//! HTTP crate, since the chunked/gzip/redirect behavior here is narrower
//! than what a `hyper`-class client assumes.

use std::io::Read;

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::{HttpClientConfig, TlsConfig},
    http::headers::{HeaderMap, HeaderParseError, read_headers, read_line},
    transport::{
        dns,
        socket::{WsStream, connect_tcp},
        tls::{TlsSetupError, build_client_connector},
        url::{UrlParseError, WsUrl, parse_ws_url},
    },
};

pub const DEFAULT_USER_AGENT: &str = "ixwebsocket/1.0.0";

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("malformed url: {0}")]
    UrlMalformed(#[from] UrlParseError),
    #[error("cannot connect: {0}")]
    CannotConnect(#[source] std::io::Error),
    #[error("tls setup failed: {0}")]
    Tls(#[from] TlsSetupError),
    #[error("cannot read status line")]
    CannotReadStatusLine,
    #[error("response is missing a status code")]
    MissingStatus,
    #[error("header parsing failed: {0}")]
    HeaderParsingError(#[from] HeaderParseError),
    #[error("redirect response is missing Location")]
    MissingLocation,
    #[error("exceeded the maximum of {0} redirects")]
    TooManyRedirects(u32),
    #[error("failed to read a chunked-encoding chunk")]
    ChunkReadError,
    #[error("cannot read response body")]
    CannotReadBody,
    #[error("gzip decompression failed: {0}")]
    GzipError(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake-phase cancellation")]
    Cancelled,
    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub upload_size: usize,
    pub download_size: usize,
}

/// Single-shot HTTP client reusing the WebSocket transport's socket/TLS/DNS
/// primitives. One instance is cheap to construct per request; nothing here
/// is kept alive across calls.
pub struct HttpClient {
    cfg: HttpClientConfig,
    tls: Option<TlsConfig>,
}

impl HttpClient {
    pub fn new(cfg: HttpClientConfig, tls: Option<TlsConfig>) -> Self {
        Self { cfg, tls }
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpClientError> {
        self.request(Method::Get, url, &HeaderMap::new(), &[], true, 0)
            .await
    }

    pub async fn head(&self, url: &str) -> Result<HttpResponse, HttpClientError> {
        self.request(Method::Head, url, &HeaderMap::new(), &[], true, 0)
            .await
    }

    pub async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<HttpResponse, HttpClientError> {
        self.request(Method::Post, url, headers, body, true, 0).await
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: &[u8],
        follow_redirects: bool,
        redirect_count: u32,
    ) -> Result<HttpResponse, HttpClientError> {
        let parsed = parse_ws_url(url)?;
        let cancel = CancellationToken::new();

        let connect_timeout = std::time::Duration::from_secs(self.cfg.connect_timeout_secs);
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(HttpClientError::Cancelled),
            res = tokio::time::timeout(connect_timeout, self.connect(&parsed)) => {
                res.map_err(|_| HttpClientError::Timeout)??
            }
        };

        let request = self.build_request(method, &parsed, headers, body);

        let transfer_timeout = std::time::Duration::from_secs(self.cfg.transfer_timeout_secs);
        let response = tokio::time::timeout(
            transfer_timeout,
            self.write_and_read(&mut stream, &request, body),
        )
        .await
        .map_err(|_| HttpClientError::Timeout)??;

        if follow_redirects && (300..400).contains(&response.status) {
            if redirect_count >= self.cfg.max_redirects {
                return Err(HttpClientError::TooManyRedirects(self.cfg.max_redirects));
            }
            let location = response
                .headers
                .get("Location")
                .ok_or(HttpClientError::MissingLocation)?
                .to_string();
            return Box::pin(self.request(
                method,
                &location,
                headers,
                body,
                follow_redirects,
                redirect_count + 1,
            ))
            .await;
        }

        Ok(response)
    }

    async fn connect(&self, url: &WsUrl) -> Result<WsStream, HttpClientError> {
        let cancel = CancellationToken::new();
        let addr = dns::resolve(&url.host, url.port, &cancel)
            .await
            .map_err(|e| HttpClientError::CannotConnect(std::io::Error::other(e.to_string())))?;

        if url.tls {
            let connector = build_client_connector(self.tls.as_ref())?;
            let tcp = tokio::net::TcpStream::connect(addr)
                .await
                .map_err(HttpClientError::CannotConnect)?;
            let domain = rustls_pki_types::ServerName::try_from(url.host.clone())
                .map_err(|_| HttpClientError::CannotConnect(std::io::Error::other("invalid DNS name")))?;
            let tls_stream = connector
                .connect(domain, tcp)
                .await
                .map_err(HttpClientError::CannotConnect)?;
            Ok(WsStream::TlsClient(Box::new(tls_stream)))
        } else {
            connect_tcp(addr)
                .await
                .map_err(|e| HttpClientError::CannotConnect(std::io::Error::other(e.to_string())))
        }
    }

    fn build_request(&self, method: Method, url: &WsUrl, headers: &HeaderMap, body: &[u8]) -> String {
        let mut req = format!(
            "{method} {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {ua}\r\nAccept: */*\r\nAccept-Encoding: gzip\r\n",
            method = method.as_str(),
            path = url.path,
            host = url.host,
            ua = self.cfg.user_agent,
        );
        let has_content_type = headers.get("Content-Type").is_some();
        for (name, value) in headers.iter() {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        if method == Method::Post {
            if !has_content_type {
                req.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
            }
            req.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        req.push_str("Connection: close\r\n\r\n");
        req
    }

    async fn write_and_read(
        &self,
        stream: &mut WsStream,
        request: &str,
        body: &[u8],
    ) -> Result<HttpResponse, HttpClientError> {
        stream.write_all(request.as_bytes()).await?;
        if !body.is_empty() {
            stream.write_all(body).await?;
        }
        stream.flush().await?;
        let upload_size = request.len() + body.len();

        let mut reader = BufReader::new(stream);
        let status_line = read_line(&mut reader)
            .await?
            .ok_or(HttpClientError::CannotReadStatusLine)?;

        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next().ok_or(HttpClientError::CannotReadStatusLine)?;
        let status: u16 = parts
            .next()
            .ok_or(HttpClientError::MissingStatus)?
            .parse()
            .map_err(|_| HttpClientError::MissingStatus)?;

        let headers = read_headers(&mut reader).await?;

        let raw_body = read_body(&mut reader, &headers, status).await?;
        let download_size = raw_body.len();

        let body = if headers.contains_value_ignore_case("Content-Encoding", "gzip") {
            decode_gzip(&raw_body)?
        } else {
            raw_body
        };

        Ok(HttpResponse {
            status,
            headers,
            body: body.freeze(),
            upload_size,
            download_size,
        })
    }
}

async fn read_body<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &HeaderMap,
    status: u16,
) -> Result<BytesMut, HttpClientError> {
    if let Some(len) = headers.get("Content-Length") {
        let len: usize = len.parse().map_err(|_| HttpClientError::CannotReadBody)?;
        let mut buf = BytesMut::zeroed(len);
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|_| HttpClientError::CannotReadBody)?;
        return Ok(buf);
    }

    if headers.contains_value_ignore_case("Transfer-Encoding", "chunked") {
        let mut body = BytesMut::new();
        loop {
            let size_line = read_line(reader)
                .await
                .map_err(|_| HttpClientError::ChunkReadError)?
                .ok_or(HttpClientError::ChunkReadError)?;
            let size_str = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_str, 16).map_err(|_| HttpClientError::ChunkReadError)?;
            if size == 0 {
                // Trailing CRLF after the terminal zero-length chunk.
                let _ = read_line(reader).await;
                break;
            }
            let mut chunk = BytesMut::zeroed(size);
            reader
                .read_exact(&mut chunk)
                .await
                .map_err(|_| HttpClientError::ChunkReadError)?;
            body.extend_from_slice(&chunk);
            // Consume the CRLF that terminates this chunk's data.
            let mut crlf = [0u8; 2];
            reader
                .read_exact(&mut crlf)
                .await
                .map_err(|_| HttpClientError::ChunkReadError)?;
        }
        return Ok(body);
    }

    if status == 204 {
        return Ok(BytesMut::new());
    }

    Err(HttpClientError::CannotReadBody)
}

fn decode_gzip(raw: &[u8]) -> Result<BytesMut, HttpClientError> {
    let mut decoder = GzDecoder::new(raw);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(HttpClientError::GzipError)?;
    Ok(BytesMut::from(&out[..]))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::BufReader;

    use super::*;

    #[tokio::test]
    async fn reads_chunked_body_to_completion() {
        let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let mut headers = HeaderMap::new();
        headers.insert("Transfer-Encoding", "chunked");
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let body = read_body(&mut reader, &headers, 200).await.unwrap();
        assert_eq!(&body[..], b"Wikipedia");
    }

    #[tokio::test]
    async fn reads_fixed_content_length_body() {
        let raw = b"hello";
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length", "5");
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let body = read_body(&mut reader, &headers, 200).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn no_length_and_204_status_is_empty_body() {
        let raw = b"";
        let headers = HeaderMap::new();
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let body = read_body(&mut reader, &headers, 204).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn no_length_and_non_204_status_fails() {
        let raw = b"";
        let headers = HeaderMap::new();
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let err = read_body(&mut reader, &headers, 200).await.unwrap_err();
        assert!(matches!(err, HttpClientError::CannotReadBody));
    }
}
