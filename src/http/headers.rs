// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Case-insensitive HTTP header map plus a CRLF line reader, shared by the
//! WebSocket upgrade handshake (`crate::handshake`) and the HTTP client
//! (`crate::http::client`). Grounded on `IXSocket::readLine` /
//! `IXWebSocketHandshake::parseHttpHeaders`.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Error)]
pub enum HeaderParseError {
    #[error("malformed header line: {0:?}")]
    MalformedLine(String),
    #[error("io error while reading headers: {0}")]
    Io(#[from] std::io::Error),
    #[error("header block exceeded the maximum line count ({0})")]
    TooManyLines(usize),
}

const MAX_HEADER_LINES: usize = 256;

/// A case-insensitive `name -> value` map. Backed by a `Vec` rather than a
/// hash map: the handful of headers in a WebSocket upgrade never justify
/// hashing overhead, and insertion order is preserved for reproducible wire
/// captures.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            existing.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_value_ignore_case(&self, name: &str, expected: &str) -> bool {
        self.get(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Reads one CRLF-terminated line, stripping the trailing `\r\n`/`\n`.
/// Returns `Ok(None)` at EOF with no bytes read.
pub async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<String>, HeaderParseError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Reads CRLF-terminated header lines until an empty line, splitting each
/// non-empty line at the first colon. On malformed input the partial map is
/// discarded and an error returned, mirroring the source's "failure flag
/// discards everything parsed so far" behavior.
pub async fn read_headers<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HeaderMap, HeaderParseError> {
    let mut map = HeaderMap::new();
    for _ in 0..MAX_HEADER_LINES {
        let line = match read_line(reader).await? {
            Some(l) => l,
            None => return Ok(map),
        };
        if line.is_empty() {
            return Ok(map);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HeaderParseError::MalformedLine(line.clone()))?;
        map.insert(name.trim(), value.trim());
    }
    Err(HeaderParseError::TooManyLines(MAX_HEADER_LINES))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn parses_headers_until_blank_line() {
        let raw = b"Host: example.com\r\nUpgrade: websocket\r\n\r\nbody ignored";
        let mut reader = Cursor::new(&raw[..]);
        let map = read_headers(&mut reader).await.unwrap();
        assert_eq!(map.get("host"), Some("example.com"));
        assert_eq!(map.get("UPGRADE"), Some("websocket"));
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive_on_both_ends() {
        let mut map = HeaderMap::new();
        map.insert("Sec-WebSocket-Accept", "abc123==");
        assert_eq!(map.get("sec-websocket-accept"), Some("abc123=="));
        assert!(map.contains_value_ignore_case("Sec-WebSocket-Accept", "ABC123=="));
    }

    #[tokio::test]
    async fn rejects_line_without_colon() {
        let raw = b"not-a-valid-header-line\r\n\r\n";
        let mut reader = Cursor::new(&raw[..]);
        let err = read_headers(&mut reader).await.unwrap_err();
        assert!(matches!(err, HeaderParseError::MalformedLine(_)));
    }

    #[tokio::test]
    async fn insert_overwrites_existing_key_case_insensitively() {
        let mut map = HeaderMap::new();
        map.insert("Connection", "close");
        map.insert("connection", "Upgrade");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Connection"), Some("Upgrade"));
    }
}
