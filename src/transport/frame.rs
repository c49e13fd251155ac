// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Failure modes of the framing layer and the transport driver built on it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    Timeout,
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    ConnectionClosed,
}

/// Failure modes specific to decoding/encoding a single frame.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("control frame must not be fragmented")]
    FragmentedControlFrame,
    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,
    #[error("payload length exceeds configured maximum ({0} > {1})")]
    PayloadTooLarge(u64, u64),
    #[error("received frame from a client without a masking key")]
    MissingMaskingKey,
    #[error("server received a masked bit of zero from a client")]
    ExpectedMaskedFrame,
    #[error("close frame payload of length 1 is invalid")]
    InvalidCloseFramePayload,
}

/// RFC 6455 §5.2 opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    fn to_raw(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    fn try_from_raw(raw: u8) -> Result<Self, FrameError> {
        match raw {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// A single decoded WebSocket frame. `rsv1` carries the permessage-deflate
/// "this message is compressed" marker (RFC 7692 §7.2.3); `fin` is the
/// standard fragmentation-terminal bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Bytes) -> Self {
        Self {
            fin: true,
            rsv1: false,
            opcode,
            payload,
        }
    }

    /// Attempts to decode one frame from the front of `buf`. Returns `Ok(None)`
    /// if `buf` does not yet contain a full frame, leaving `buf` untouched in
    /// that case. `is_server` selects whether an unmasked frame is a protocol
    /// error (server role must reject unmasked client frames).
    pub fn decode(
        buf: &mut BytesMut,
        is_server: bool,
        max_payload_len: u64,
    ) -> Result<Option<Frame>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;
        if rsv2 || rsv3 {
            return Err(FrameError::ReservedBitsSet);
        }
        let opcode = Opcode::try_from_raw(b0 & 0x0F)?;

        let masked = b1 & 0x80 != 0;
        if is_server && !masked {
            return Err(FrameError::ExpectedMaskedFrame);
        }

        let len7 = b1 & 0x7F;
        let mut cursor = 2usize;

        let payload_len: u64 = match len7 {
            126 => {
                if buf.len() < cursor + 2 {
                    return Ok(None);
                }
                let v = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as u64;
                cursor += 2;
                v
            }
            127 => {
                if buf.len() < cursor + 8 {
                    return Ok(None);
                }
                let v = u64::from_be_bytes(buf[cursor..cursor + 8].try_into().expect("8 bytes"));
                cursor += 8;
                v
            }
            n => n as u64,
        };

        if payload_len > max_payload_len {
            return Err(FrameError::PayloadTooLarge(payload_len, max_payload_len));
        }

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if payload_len > 125 {
                return Err(FrameError::ControlFramePayloadTooLarge);
            }
            if opcode == Opcode::Close && payload_len == 1 {
                return Err(FrameError::InvalidCloseFramePayload);
            }
        }

        let mask_key = if masked {
            if buf.len() < cursor + 4 {
                return Ok(None);
            }
            let key: [u8; 4] = buf[cursor..cursor + 4].try_into().expect("4 bytes");
            cursor += 4;
            Some(key)
        } else {
            None
        };

        let total_len = cursor + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(cursor);
        let mut payload = buf.split_to(payload_len as usize);

        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            rsv1,
            opcode,
            payload: payload.freeze(),
        }))
    }

    /// Serializes the frame into `out`. When `mask_key` is `Some`, the payload
    /// is masked (client role); server-to-client frames pass `None`.
    pub fn encode_into(&self, out: &mut BytesMut, mask_key: Option<[u8; 4]>) {
        let mut b0 = self.opcode.to_raw();
        if self.fin {
            b0 |= 0x80;
        }
        if self.rsv1 {
            b0 |= 0x40;
        }
        out.put_u8(b0);

        let len = self.payload.len();
        let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };

        if len < 126 {
            out.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.put_u8(mask_bit | 126);
            out.put_u16(len as u16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }

        match mask_key {
            Some(key) => {
                out.put_slice(&key);
                let start = out.len();
                out.put_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.put_slice(&self.payload),
        }
    }
}

/// XORs `data` in place with the 4-byte masking key, per RFC 6455 §5.3.
fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_unmasked_text_frame() {
        let frame = Frame::new(Opcode::Text, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf, None);

        let decoded = Frame::decode(&mut buf, false, 1 << 20)
            .unwrap()
            .expect("full frame present");
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trips_a_masked_frame() {
        let frame = Frame::new(Opcode::Binary, Bytes::from_static(b"\x01\x02\x03"));
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf, Some([0xde, 0xad, 0xbe, 0xef]));

        let decoded = Frame::decode(&mut buf, true, 1 << 20)
            .unwrap()
            .expect("full frame present");
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        let frame = Frame::new(Opcode::Text, Bytes::from_static(b"hi"));
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf, None);

        let err = Frame::decode(&mut buf, true, 1 << 20).unwrap_err();
        assert_eq!(err, FrameError::ExpectedMaskedFrame);
    }

    #[test]
    fn incomplete_frame_returns_none_without_consuming() {
        let mut buf = BytesMut::from(&b"\x81"[..]);
        let res = Frame::decode(&mut buf, false, 1 << 20).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x09); // FIN=0, opcode=Ping
        buf.put_u8(0x00);
        let err = Frame::decode(&mut buf, false, 1 << 20).unwrap_err();
        assert_eq!(err, FrameError::FragmentedControlFrame);
    }

    #[test]
    fn decodes_16_bit_extended_length() {
        let payload = Bytes::from(vec![0x42u8; 200]);
        let frame = Frame::new(Opcode::Binary, payload.clone());
        let mut buf = BytesMut::new();
        frame.encode_into(&mut buf, None);
        assert_eq!(buf[1] & 0x7F, 126);

        let decoded = Frame::decode(&mut buf, false, 1 << 20).unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x82); // FIN=1, opcode=Binary
        buf.put_u8(126);
        buf.put_u16(1000);
        let err = Frame::decode(&mut buf, false, 10).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(1000, 10));
    }
}
