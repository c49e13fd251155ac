// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlParseError {
    #[error("url is missing the \"://\" scheme separator")]
    MissingSchemeSeparator,
    #[error("url is missing a host")]
    MissingHost,
    #[error("unsupported scheme {0:?}; expected ws, wss, http, or https")]
    UnsupportedScheme(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// A parsed `ws://`/`wss://` (or `http(s)://`) URL, split the way
/// `IXUrlParser::parse` splits it: scheme, host, port, and a path that
/// always starts with `/` and carries the query string inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

/// Parses `url` with the same defaulting rules as the source parser:
/// `ws`/`http` default to port 80, `wss`/`https` default to port 443; an
/// empty path becomes `/`; a path not already starting with `/` gets one
/// prepended (not replaced); a non-empty query string is appended to the
/// path with a `?` separator.
pub fn parse_ws_url(url: &str) -> Result<WsUrl, UrlParseError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or(UrlParseError::MissingSchemeSeparator)?;

    let tls = match scheme {
        "ws" | "http" => false,
        "wss" | "https" => true,
        other => return Err(UrlParseError::UnsupportedScheme(other.to_string())),
    };
    let default_port: u16 = if tls { 443 } else { 80 };

    let (authority, path_and_query) = match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    if authority.is_empty() {
        return Err(UrlParseError::MissingHost);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| UrlParseError::InvalidPort(p.to_string()))?;
            (h.to_string(), port)
        }
        None => (authority.to_string(), default_port),
    };

    let (path_part, query_part) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let mut path = if path_part.is_empty() {
        "/".to_string()
    } else if path_part.starts_with('/') {
        path_part.to_string()
    } else {
        format!("/{path_part}")
    };

    if let Some(query) = query_part {
        if !query.is_empty() {
            path.push('?');
            path.push_str(query);
        }
    }

    Ok(WsUrl {
        scheme: scheme.to_string(),
        host,
        port,
        path,
        tls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ws_port_to_80() {
        let url = parse_ws_url("ws://example.com/chat").unwrap();
        assert_eq!(url.port, 80);
        assert_eq!(url.host, "example.com");
        assert_eq!(url.path, "/chat");
        assert!(!url.tls);
    }

    #[test]
    fn defaults_wss_port_to_443() {
        let url = parse_ws_url("wss://example.com").unwrap();
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/");
        assert!(url.tls);
    }

    #[test]
    fn explicit_port_overrides_default() {
        let url = parse_ws_url("ws://example.com:9001/echo").unwrap();
        assert_eq!(url.port, 9001);
    }

    #[test]
    fn query_only_url_still_gets_a_leading_slash_path() {
        let url = parse_ws_url("ws://example.com?token=abc").unwrap();
        assert_eq!(url.path, "/?token=abc");
    }

    #[test]
    fn query_string_is_appended_to_path() {
        let url = parse_ws_url("ws://example.com/chat?token=abc").unwrap();
        assert_eq!(url.path, "/chat?token=abc");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = parse_ws_url("ftp://example.com").unwrap_err();
        assert_eq!(err, UrlParseError::UnsupportedScheme("ftp".to_string()));
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        let err = parse_ws_url("example.com/chat").unwrap_err();
        assert_eq!(err, UrlParseError::MissingSchemeSeparator);
    }
}
