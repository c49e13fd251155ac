// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use rand::Rng;

/// Alphabet `IXWebSocketHandshake.cpp`'s `genRandomString` draws from when
/// generating the client's `Sec-WebSocket-Key` nonce.
const KEY_ALPHABET: &[u8] = b"0123456789ABCDEFGHabcdefgh";

/// Generates the client's `Sec-WebSocket-Key` header value: 22 random
/// characters drawn from `KEY_ALPHABET` followed by a literal `"=="`,
/// matching the original's `genRandomString(22)` generation scheme rather
/// than true base64 of 16 random bytes — RFC 6455 §4.1 only requires the
/// value be present, not a particular encoding of it, and the accept-key
/// computation treats it as an opaque string either way.
pub fn generate_sec_websocket_key() -> String {
    let mut rng = rand::rng();
    let mut key = String::with_capacity(24);
    for _ in 0..22 {
        let idx = rng.random_range(0..KEY_ALPHABET.len());
        key.push(KEY_ALPHABET[idx] as char);
    }
    key.push_str("==");
    key
}

/// Generates a 4-byte client-to-server frame masking key (RFC 6455 §5.3).
pub fn generate_masking_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::rng().fill(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_websocket_key_is_22_alphabet_chars_plus_literal_padding() {
        let key = generate_sec_websocket_key();
        assert_eq!(key.len(), 24);
        assert!(key.ends_with("=="));
        assert!(key[..22].bytes().all(|b| KEY_ALPHABET.contains(&b)));
    }

    #[test]
    fn masking_key_is_four_bytes() {
        let key = generate_masking_key();
        assert_eq!(key.len(), 4);
    }
}
