// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cancellation;
pub mod dns;
pub mod frame;
pub mod interrupter;
pub mod socket;
pub mod tls;
pub mod url;

use std::{sync::Arc, time::Duration};

/// Outbound frames are fragmented at this boundary, matching the source's
/// 32 KiB chunking of large `send_data` payloads.
const SEND_CHUNK_SIZE: usize = 32 * 1024;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    deflate::{PerMessageDeflateCompressor, PerMessageDeflateDecompressor},
    transport::{
        frame::{Frame, FrameError, Opcode, TransportError},
        interrupter::{Interrupter, WakeReason},
        socket::WsStream,
    },
};

/// A fully reassembled message delivered to the owning facade
/// ([`crate::websocket::WebSocket`] or [`crate::server::SocketServer`]).
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Text {
        text: String,
        decompression_error: bool,
    },
    Binary {
        data: Bytes,
        decompression_error: bool,
    },
    /// A non-terminal fragment (`fin=0`) of a still-assembling message,
    /// carried with an empty payload — the payload itself only appears on
    /// the frame that completes the message.
    Fragment,
    Ping(Bytes),
    Pong(Bytes),
    /// `remote` is `true` when the peer sent the first CLOSE frame of the
    /// closing handshake, `false` when this side initiated it and the peer
    /// merely echoed back. `code` is `Some(1006)` for an abnormal closure:
    /// the TCP stream went away without either side ever exchanging a CLOSE
    /// frame.
    Close {
        code: Option<u16>,
        reason: String,
        remote: bool,
    },
}

/// How far along the closing handshake this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    Open,
    /// This side sent a CLOSE frame first and is waiting (up to
    /// `CLOSING_MAXIMUM_WAITING_DELAY`) for the peer to echo one back.
    LocalInitiated,
}

/// Upper bound on how long a locally-initiated close waits for the peer's
/// echoing CLOSE frame before the connection is torn down anyway.
const CLOSING_MAXIMUM_WAITING_DELAY: Duration = Duration::from_millis(200);

/// Per-connection knobs the driver needs that don't belong to the wire
/// format itself.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub is_server: bool,
    pub max_payload_len: u64,
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Option<Duration>,
    pub enable_pong: bool,
    pub deflate_enabled: bool,
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            is_server: false,
            max_payload_len: 64 * 1024 * 1024,
            ping_interval: None,
            ping_timeout: None,
            enable_pong: true,
            deflate_enabled: false,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
        }
    }
}

/// Cloneable outbound handle for a running [`Connection`]. Enqueues a frame
/// into the shared `tx_buf` and wakes the driver, keeping callers off the
/// read loop entirely.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx_buf: Arc<Mutex<BytesMut>>,
    interrupter: Interrupter,
    is_server: bool,
    compressor: Arc<Mutex<Option<PerMessageDeflateCompressor>>>,
    pending_close: Arc<Mutex<Option<(u16, String)>>>,
}

/// What a `send_text`/`send_binary` call actually put on the wire, mirroring
/// the source's `WebSocketSendInfo`.
#[derive(Debug, Clone, Copy)]
pub struct WireSendOutcome {
    pub wire_size: usize,
    pub payload_size: usize,
    pub compression_error: bool,
}

impl ConnectionHandle {
    pub async fn send_text(&self, text: &str) -> WireSendOutcome {
        self.send_message(Opcode::Text, Bytes::copy_from_slice(text.as_bytes()))
            .await
    }

    pub async fn send_binary(&self, data: Bytes) -> WireSendOutcome {
        self.send_message(Opcode::Binary, data).await
    }

    /// Compresses (if negotiated) then fragments `payload` across
    /// `SEND_CHUNK_SIZE` frames: the first frame carries `opcode` and the
    /// compressed-payload `rsv1` bit, later frames carry `Continuation`,
    /// and only the last frame is `fin`.
    async fn send_message(&self, opcode: Opcode, payload: Bytes) -> WireSendOutcome {
        let payload_size = payload.len();
        let (data, rsv1, compression_error) = {
            let mut guard = self.compressor.lock().await;
            match guard.as_mut() {
                Some(compressor) => match compressor.compress(&payload) {
                    Ok(compressed) => (compressed.freeze(), true, false),
                    Err(e) => {
                        tracing::warn!(error = %e, "permessage-deflate compression failed, sending uncompressed");
                        (payload, false, true)
                    }
                },
                None => (payload, false, false),
            }
        };

        let mut wire_size = 0usize;
        let total = data.len();
        if total <= SEND_CHUNK_SIZE {
            wire_size += self.enqueue_framed(opcode, data, rsv1, true).await;
        } else {
            let mut offset = 0usize;
            while offset < total {
                let end = (offset + SEND_CHUNK_SIZE).min(total);
                let chunk = data.slice(offset..end);
                let is_first = offset == 0;
                let is_last = end == total;
                let frame_opcode = if is_first { opcode } else { Opcode::Continuation };
                wire_size += self
                    .enqueue_framed(frame_opcode, chunk, is_first && rsv1, is_last)
                    .await;
                offset = end;
            }
        }

        WireSendOutcome {
            wire_size,
            payload_size,
            compression_error,
        }
    }

    async fn enqueue_framed(&self, opcode: Opcode, payload: Bytes, rsv1: bool, fin: bool) -> usize {
        let mut frame = Frame::new(opcode, payload);
        frame.fin = fin;
        frame.rsv1 = rsv1;
        let mask_key = if self.is_server {
            None
        } else {
            Some(crate::utils::generate_masking_key())
        };
        let mut buf = self.tx_buf.lock().await;
        let before = buf.len();
        frame.encode_into(&mut buf, mask_key);
        let wire_size = buf.len() - before;
        drop(buf);
        self.interrupter.wake(WakeReason::SendRequest).await;
        wire_size
    }

    pub async fn send_ping(&self, payload: Bytes) {
        self.enqueue(Opcode::Ping, payload).await;
    }

    pub async fn send_pong(&self, payload: Bytes) {
        self.enqueue(Opcode::Pong, payload).await;
    }

    pub async fn send_close(&self, code: u16, reason: &str) {
        *self.pending_close.lock().await = Some((code, reason.to_string()));
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.enqueue(Opcode::Close, payload.freeze()).await;
        self.interrupter.wake(WakeReason::CloseRequest).await;
    }

    async fn enqueue(&self, opcode: Opcode, payload: Bytes) {
        let frame = Frame::new(opcode, payload);
        let mask_key = if self.is_server {
            None
        } else {
            Some(crate::utils::generate_masking_key())
        };
        {
            let mut buf = self.tx_buf.lock().await;
            frame.encode_into(&mut buf, mask_key);
        }
        self.interrupter.wake(WakeReason::SendRequest).await;
    }
}

/// Owns the split stream halves and drives frame I/O, heartbeat scheduling,
/// and permessage-deflate (de)compression for a single connection.
pub struct Connection {
    reader: ReadHalf<WsStream>,
    writer: WriteHalf<WsStream>,
    options: ConnectionOptions,
    tx_buf: Arc<Mutex<BytesMut>>,
    interrupter_rx: mpsc::Receiver<WakeReason>,
    interrupter: Interrupter,
    cancel: CancellationToken,
    compressor: Arc<Mutex<Option<PerMessageDeflateCompressor>>>,
    decompressor: Option<PerMessageDeflateDecompressor>,
    close_state: CloseState,
    close_frame_seen: bool,
    closing_deadline: Option<Instant>,
    pending_close: Arc<Mutex<Option<(u16, String)>>>,
    sent_close: Option<(u16, String)>,
}

impl Connection {
    pub fn new(stream: WsStream, options: ConnectionOptions, cancel: CancellationToken) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (interrupter, interrupter_rx) = interrupter::channel();

        let compressor = options.deflate_enabled.then(|| {
            let no_context_takeover = if options.is_server {
                options.server_no_context_takeover
            } else {
                options.client_no_context_takeover
            };
            let window_bits = if options.is_server {
                options.server_max_window_bits
            } else {
                options.client_max_window_bits
            };
            PerMessageDeflateCompressor::new(window_bits, no_context_takeover)
        });
        let decompressor = options
            .deflate_enabled
            .then(PerMessageDeflateDecompressor::new);

        Self {
            reader,
            writer,
            options,
            tx_buf: Arc::new(Mutex::new(BytesMut::new())),
            interrupter_rx,
            interrupter,
            cancel,
            compressor: Arc::new(Mutex::new(compressor)),
            decompressor,
            close_state: CloseState::Open,
            close_frame_seen: false,
            closing_deadline: None,
            pending_close: Arc::new(Mutex::new(None)),
            sent_close: None,
        }
    }

    /// Returns a cloneable handle callers use to queue outbound frames.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            tx_buf: self.tx_buf.clone(),
            interrupter: self.interrupter.clone(),
            is_server: self.options.is_server,
            compressor: self.compressor.clone(),
            pending_close: self.pending_close.clone(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the connection until it closes or `cancel` fires, emitting
    /// reassembled messages on `events_tx`. GCD-scheduled heartbeat:
    /// the poll interval used to check both the send-ping and
    /// missed-pong deadlines is `gcd(ping_interval, ping_timeout)`, so one
    /// timer serves both checks without over- or under-firing.
    pub async fn run(mut self, events_tx: mpsc::UnboundedSender<IncomingMessage>) {
        let mut read_buf = BytesMut::with_capacity(8192);
        let mut scratch = [0u8; 8192];
        let mut fragments: Vec<(Opcode, bool, BytesMut)> = Vec::new();

        let heartbeat_tick = gcd_duration(self.options.ping_interval, self.options.ping_timeout);
        let mut last_ping_sent: Option<Instant> = None;
        let mut last_pong_seen = Instant::now();
        let mut heartbeat =
            tokio::time::interval(heartbeat_tick.unwrap_or(Duration::from_secs(3600)));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("connection cancelled");
                    break;
                }
                reason = self.interrupter_rx.recv() => {
                    match reason {
                        Some(WakeReason::SendRequest) => {
                            if let Err(e) = self.flush_tx_buf().await {
                                warn!(error = %e, "failed to flush outbound frame");
                                break;
                            }
                        }
                        Some(WakeReason::CloseRequest) => {
                            let _ = self.flush_tx_buf().await;
                            if self.close_state == CloseState::Open {
                                self.close_state = CloseState::LocalInitiated;
                                self.sent_close = self.pending_close.lock().await.clone();
                                self.closing_deadline = Some(Instant::now() + CLOSING_MAXIMUM_WAITING_DELAY);
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(self.closing_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))), if self.closing_deadline.is_some() => {
                    debug!("closing handshake timed out waiting for peer echo");
                    let (code, reason) = match &self.sent_close {
                        Some((code, reason)) => (Some(*code), reason.clone()),
                        None => ((!self.close_frame_seen).then_some(1006), String::new()),
                    };
                    let _ = events_tx.send(IncomingMessage::Close { code, reason, remote: false });
                    let _ = self.writer.shutdown().await;
                    break;
                }
                _ = heartbeat.tick(), if heartbeat_tick.is_some() => {
                    if let Some(interval) = self.options.ping_interval {
                        let due = last_ping_sent.map(|t| t.elapsed() >= interval).unwrap_or(true);
                        if due {
                            let payload = Bytes::from(format!("websocket-rs::heartbeat::{}s", interval.as_secs()));
                            self.handle().send_ping(payload).await;
                            last_ping_sent = Some(Instant::now());
                        }
                    }
                    if let Some(timeout) = self.options.ping_timeout {
                        if last_pong_seen.elapsed() > timeout && self.close_state == CloseState::Open {
                            debug!("missed pong deadline, closing connection");
                            self.handle().send_close(1011, "Ping timeout").await;
                            let _ = self.flush_tx_buf().await;
                            self.close_state = CloseState::LocalInitiated;
                            self.sent_close = Some((1011, "Ping timeout".to_string()));
                            self.closing_deadline = Some(Instant::now() + CLOSING_MAXIMUM_WAITING_DELAY);
                        }
                    }
                }
                read_result = self.reader.read(&mut scratch) => {
                    match read_result {
                        Ok(0) => {
                            let code = (!self.close_frame_seen).then_some(1006);
                            let _ = events_tx.send(IncomingMessage::Close { code, reason: String::new(), remote: true });
                            break;
                        }
                        Ok(n) => {
                            read_buf.extend_from_slice(&scratch[..n]);
                        }
                        Err(e) => {
                            warn!(error = %e, "read error");
                            break;
                        }
                    }

                    loop {
                        match Frame::decode(&mut read_buf, self.options.is_server, self.options.max_payload_len) {
                            Ok(Some(frame)) => {
                                last_pong_seen = if frame.opcode == Opcode::Pong { Instant::now() } else { last_pong_seen };
                                if self.handle_frame(frame, &mut fragments, &events_tx).await.is_break() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(error = %e, "frame decode error, closing with protocol error");
                                self.close_locally(1002, e.to_string(), &events_tx).await;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn flush_tx_buf(&mut self) -> Result<(), TransportError> {
        let mut buf = self.tx_buf.lock().await;
        if buf.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        buf.clear();
        Ok(())
    }

    /// Sends a locally-initiated CLOSE frame, emits the corresponding `Close`
    /// event, and shuts down the writer. Used for protocol violations
    /// (§4.9.2's bad-opcode/bad-length/fragmented-control-frame errors close
    /// with 1002) where there is no peer echo to wait for.
    async fn close_locally(
        &mut self,
        code: u16,
        reason: String,
        events_tx: &mpsc::UnboundedSender<IncomingMessage>,
    ) {
        self.handle().send_close(code, &reason).await;
        let _ = self.flush_tx_buf().await;
        let _ = events_tx.send(IncomingMessage::Close { code: Some(code), reason, remote: false });
        let _ = self.writer.shutdown().await;
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        fragments: &mut Vec<(Opcode, bool, BytesMut)>,
        events_tx: &mpsc::UnboundedSender<IncomingMessage>,
    ) -> ControlFlow {
        match frame.opcode {
            Opcode::Ping => {
                if self.options.enable_pong {
                    self.handle().send_pong(frame.payload.clone()).await;
                }
                let _ = events_tx.send(IncomingMessage::Ping(frame.payload));
                ControlFlow::Continue
            }
            Opcode::Pong => {
                let _ = events_tx.send(IncomingMessage::Pong(frame.payload));
                ControlFlow::Continue
            }
            Opcode::Close => {
                self.close_frame_seen = true;
                let (code, reason) = parse_close_payload(&frame.payload);
                let remote = self.close_state == CloseState::Open;
                if remote {
                    // Peer-initiated: reply in kind before tearing down, per
                    // the closing handshake in RFC 6455 §7.1.1. `code` is
                    // always `Some` here (§4.9.2's 1005 sentinel covers a
                    // codeless payload); the fallback only guards the type.
                    self.handle().send_close(code.unwrap_or(1005), &reason).await;
                    let _ = self.flush_tx_buf().await;
                } else if let Some((sent_code, sent_reason)) = &self.sent_close {
                    // We initiated: this is only a valid echo if it carries
                    // back what we sent. A mismatched echo is ignored and the
                    // closing deadline is left to fire instead.
                    let matches = code == Some(*sent_code) && reason == *sent_reason;
                    if !matches {
                        return ControlFlow::Continue;
                    }
                }
                let _ = events_tx.send(IncomingMessage::Close { code, reason, remote });
                let _ = self.writer.shutdown().await;
                ControlFlow::Break
            }
            Opcode::Text | Opcode::Binary => {
                if frame.fin && fragments.is_empty() {
                    self.deliver_message(frame.opcode, frame.rsv1, BytesMut::from(&frame.payload[..]), events_tx);
                } else {
                    fragments.push((frame.opcode, frame.rsv1, BytesMut::from(&frame.payload[..])));
                    if !frame.fin {
                        let _ = events_tx.send(IncomingMessage::Fragment);
                    }
                }
                ControlFlow::Continue
            }
            Opcode::Continuation => {
                if let Some((opcode, rsv1, mut acc)) = fragments.pop() {
                    acc.extend_from_slice(&frame.payload);
                    if frame.fin {
                        self.deliver_message(opcode, rsv1, acc, events_tx);
                    } else {
                        fragments.push((opcode, rsv1, acc));
                        let _ = events_tx.send(IncomingMessage::Fragment);
                    }
                } else {
                    warn!("continuation frame with no preceding fragment");
                }
                ControlFlow::Continue
            }
        }
    }

    /// Delivers a fully reassembled message. A decompression failure still
    /// delivers the message (with an empty payload and
    /// `decompression_error = true`) so the consumer observes the error,
    /// rather than silently dropping it.
    fn deliver_message(
        &mut self,
        opcode: Opcode,
        compressed: bool,
        mut payload: BytesMut,
        events_tx: &mpsc::UnboundedSender<IncomingMessage>,
    ) {
        let mut decompression_error = false;
        if compressed {
            if let Some(decompressor) = &mut self.decompressor {
                match decompressor.decompress(&payload) {
                    Ok(out) => payload = out,
                    Err(e) => {
                        warn!(error = %e, "permessage-deflate decompression failed");
                        decompression_error = true;
                        payload = BytesMut::new();
                    }
                }
            }
        }

        let message = match opcode {
            Opcode::Text => {
                let text = if decompression_error {
                    String::new()
                } else {
                    match String::from_utf8(payload.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("text frame was not valid utf-8");
                            return;
                        }
                    }
                };
                IncomingMessage::Text { text, decompression_error }
            }
            Opcode::Binary => IncomingMessage::Binary {
                data: payload.freeze(),
                decompression_error,
            },
            _ => unreachable!("deliver_message only called for Text/Binary"),
        };

        trace!("delivering reassembled message");
        let _ = events_tx.send(message);
    }
}

enum ControlFlow {
    Continue,
    Break,
}

impl ControlFlow {
    fn is_break(&self) -> bool {
        matches!(self, ControlFlow::Break)
    }
}

/// Parses a received CLOSE frame's optional `u16` code + UTF-8 reason. A
/// payload shorter than 2 bytes carries no status code at all, which §4.9.2
/// maps onto the `1005`/"No status code" sentinel rather than `None` — `None`
/// is reserved for the case where no CLOSE frame was ever received (the
/// `1006` abnormal-closure path).
fn parse_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (Some(1005), "No status code".to_string());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (Some(code), reason)
}

fn gcd_duration(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Duration::from_secs(gcd(a.as_secs().max(1), b.as_secs().max(1)))),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_of_ping_interval_and_timeout() {
        assert_eq!(gcd(30, 90), 30);
        assert_eq!(gcd(7, 3), 1);
        assert_eq!(gcd(0, 5), 5);
    }

    #[test]
    fn close_payload_without_code_uses_no_status_code_sentinel() {
        assert_eq!(
            parse_close_payload(&[]),
            (Some(1005), "No status code".to_string())
        );
    }

    #[test]
    fn close_payload_decodes_code_and_reason() {
        let mut payload = vec![0x03, 0xE8];
        payload.extend_from_slice(b"bye");
        assert_eq!(parse_close_payload(&payload), (Some(1000), "bye".to_string()));
    }
}
