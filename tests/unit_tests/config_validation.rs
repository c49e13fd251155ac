// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use websocket_rs::cfg::config::Config;

const MINIMAL_YAML: &str = r#"
websocket:
  Url: "ws://localhost:8080/"
  Heartbeat:
    PingIntervalSecs: 0
    PingTimeoutSecs: 0
  Reconnection:
    AutomaticReconnection: "No"
  HandshakeTimeoutSecs: 5
"#;

#[test]
fn loads_a_minimal_document_and_fills_in_defaults() {
    let cfg: Config = serde_yaml::from_str(MINIMAL_YAML).expect("parse minimal config");
    assert_eq!(cfg.websocket.url, "ws://localhost:8080/");
    assert!(cfg.server.is_none());
    assert_eq!(cfg.http_client.user_agent, "ixwebsocket/1.0.0");
    assert_eq!(cfg.http_client.max_redirects, 5);
}

#[test]
fn empty_url_fails_validation() {
    let mut cfg: Config = serde_yaml::from_str(MINIMAL_YAML).unwrap();
    cfg.websocket.url.clear();
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn window_bits_of_eight_are_sanitized_on_validation() {
    let yaml = MINIMAL_YAML.replace(
        "HandshakeTimeoutSecs: 5",
        "HandshakeTimeoutSecs: 5\n  PerMessageDeflate:\n    Enabled: true\n    ServerMaxWindowBits: 8\n    ClientMaxWindowBits: 8",
    );
    let mut cfg: Config = serde_yaml::from_str(&yaml).unwrap();
    cfg.validate_and_normalize().unwrap();
    assert_eq!(cfg.websocket.per_message_deflate.server_max_window_bits, 9);
    assert_eq!(cfg.websocket.per_message_deflate.client_max_window_bits, 9);
}

#[test]
fn server_section_with_zero_max_connections_fails_validation() {
    let yaml = format!(
        "{MINIMAL_YAML}server:\n  Host: \"127.0.0.1\"\n  Port: 9000\n  MaxConnections: 0\n"
    );
    let mut cfg: Config = serde_yaml::from_str(&yaml).unwrap();
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn load_from_file_round_trips_through_disk() {
    let mut path = std::env::temp_dir();
    path.push(format!("websocket-rs-test-config-{}.yaml", std::process::id()));
    std::fs::write(&path, MINIMAL_YAML).expect("write temp config");

    let cfg = Config::load_from_file(&path).expect("load config from disk");
    assert_eq!(cfg.websocket.url, "ws://localhost:8080/");

    let _ = std::fs::remove_file(&path);
}
