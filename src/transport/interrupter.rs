// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio::sync::mpsc;

/// Signals that can break the transport driver out of its `tokio::select!`
/// wait without a new byte arriving on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A caller queued an outbound frame and wants the writer to flush it.
    SendRequest,
    /// A caller requested the connection be torn down.
    CloseRequest,
}

/// Sending half of the interrupter channel, cloned into every task that may
/// need to wake the driver loop.
#[derive(Clone)]
pub struct Interrupter {
    tx: mpsc::Sender<WakeReason>,
}

impl Interrupter {
    pub async fn wake(&self, reason: WakeReason) {
        // Only fails if the driver task already dropped its receiver, which
        // means the connection is tearing down anyway; nothing to do.
        let _ = self.tx.send(reason).await;
    }

    pub fn try_wake(&self, reason: WakeReason) {
        let _ = self.tx.try_send(reason);
    }
}

/// Creates a bounded interrupter channel pair. A small bound keeps wake
/// fan-in cheap while still letting the receiver drain backlog in order.
pub fn channel() -> (Interrupter, mpsc::Receiver<WakeReason>) {
    let (tx, rx) = mpsc::channel(16);
    (Interrupter { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wake_delivers_the_reason() {
        let (interrupter, mut rx) = channel();
        interrupter.wake(WakeReason::SendRequest).await;
        assert_eq!(rx.recv().await, Some(WakeReason::SendRequest));
    }

    #[test]
    fn try_wake_does_not_block_when_channel_has_room() {
        let (interrupter, _rx) = channel();
        interrupter.try_wake(WakeReason::CloseRequest);
    }
}
