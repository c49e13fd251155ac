// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RFC 7692 permessage-deflate compressor/decompressor pair: raw deflate
//! (negative window bits, no zlib header), tail-stripping the trailing
//! `00 00 FF FF` block on compress and re-appending it before inflate.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use thiserror::Error;

/// The four bytes RFC 7692 §7.2.1 says a compressor may omit from the tail
/// of every message and a decompressor must re-append before inflating.
const TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Fixed encoding of a zero-length deflate block, substituted directly for
/// an empty payload rather than running zero bytes through zlib.
const EMPTY_COMPRESSED_BLOCK: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0xff, 0xff];

const CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum DeflateError {
    #[error("zlib compression failed: {0:?}")]
    Compress(flate2::CompressError),
    #[error("zlib decompression failed: {0:?}")]
    Decompress(flate2::DecompressError),
    #[error("decompressed payload exceeds the configured maximum ({0} > {1})")]
    TooLarge(usize, usize),
}

/// Streaming compressor half of one negotiated permessage-deflate extension.
/// One instance lives for the lifetime of the connection when context
/// takeover is enabled; `no_context_takeover` instead resets the sliding
/// window after every message via `Z_FULL_FLUSH`.
pub struct PerMessageDeflateCompressor {
    compress: Compress,
    flush: FlushCompress,
}

impl PerMessageDeflateCompressor {
    pub fn new(window_bits: u8, no_context_takeover: bool) -> Self {
        let compress = Compress::new_with_window_bits(
            Compression::new(4),
            false,
            window_bits.clamp(9, 15),
        );
        let flush = if no_context_takeover {
            FlushCompress::Full
        } else {
            FlushCompress::Sync
        };
        Self { compress, flush }
    }

    pub fn compress(&mut self, input: &[u8]) -> Result<BytesMut, DeflateError> {
        if input.is_empty() {
            return Ok(BytesMut::from(&EMPTY_COMPRESSED_BLOCK[..]));
        }

        let mut out = BytesMut::zeroed(CHUNK);
        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            if out.len() < produced + CHUNK {
                out.resize(produced + CHUNK, 0);
            }
            let status = self
                .compress
                .compress(&input[consumed..], &mut out[produced..], self.flush)
                .map_err(DeflateError::Compress)?;
            consumed += (self.compress.total_in() - before_in) as usize;
            produced += (self.compress.total_out() - before_out) as usize;

            let consumed_all = consumed >= input.len();
            match status {
                Status::Ok | Status::BufError if !consumed_all => continue,
                _ => break,
            }
        }
        out.truncate(produced);

        if out.ends_with(&TAIL) {
            let new_len = out.len() - TAIL.len();
            out.truncate(new_len);
        }
        Ok(out)
    }
}

/// Streaming decompressor half. Mirrors the compressor's context-takeover
/// policy from the peer's perspective: the caller decides per-message
/// whether to keep the sliding window (default) based on the negotiated
/// `*_no_context_takeover` flag — `PerMessageDeflateDecompressor` itself just
/// inflates what it's given.
pub struct PerMessageDeflateDecompressor {
    decompress: Decompress,
}

impl PerMessageDeflateDecompressor {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(false),
        }
    }

    pub fn decompress(&mut self, input: &[u8]) -> Result<BytesMut, DeflateError> {
        let mut buf = BytesMut::with_capacity(input.len() + TAIL.len());
        buf.extend_from_slice(input);
        buf.extend_from_slice(&TAIL);

        let mut out = BytesMut::zeroed(CHUNK.max(input.len() * 2));
        let mut consumed = 0usize;
        let mut produced = 0usize;
        loop {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            if out.len() < produced + CHUNK {
                out.resize(produced + CHUNK, 0);
            }
            let status = self
                .decompress
                .decompress(&buf[consumed..], &mut out[produced..], FlushDecompress::Sync)
                .map_err(DeflateError::Decompress)?;
            consumed += (self.decompress.total_in() - before_in) as usize;
            produced += (self.decompress.total_out() - before_out) as usize;

            let consumed_all = consumed >= buf.len();
            match status {
                Status::Ok | Status::BufError if !consumed_all => continue,
                _ => break,
            }
        }
        out.truncate(produced);
        Ok(out)
    }
}

impl Default for PerMessageDeflateDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payloads() {
        for payload in [
            &b""[..],
            b"hello",
            b"the quick brown fox jumps over the lazy dog",
            &[0x41u8; 10_000],
        ] {
            let mut compressor = PerMessageDeflateCompressor::new(15, false);
            let mut decompressor = PerMessageDeflateDecompressor::new();

            let compressed = compressor.compress(payload).unwrap();
            let decompressed = decompressor.decompress(&compressed).unwrap();
            assert_eq!(&decompressed[..], payload);
        }
    }

    #[test]
    fn empty_payload_emits_fixed_six_byte_block() {
        let mut compressor = PerMessageDeflateCompressor::new(15, false);
        let out = compressor.compress(b"").unwrap();
        assert_eq!(&out[..], &EMPTY_COMPRESSED_BLOCK[..]);
    }

    #[test]
    fn no_context_takeover_still_round_trips_across_messages() {
        let mut compressor = PerMessageDeflateCompressor::new(15, true);
        let mut decompressor = PerMessageDeflateDecompressor::new();

        for msg in [&b"first message"[..], b"second message", b"third"] {
            let compressed = compressor.compress(msg).unwrap();
            let decompressed = decompressor.decompress(&compressed).unwrap();
            assert_eq!(&decompressed[..], msg);
        }
    }
}
