//! Transport contract for sync sessions
//!
//! A transport is a reliable, ordered, message-framed duplex link that may
//! drop at any moment. Anything satisfying that (a WebSocket, a TCP stream
//! with length prefixes, a BLE characteristic) can carry a sync session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::TransportError;

/// An active link to one peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame to the peer.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next frame from the peer.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Tear the link down. Both ends observe the disconnect.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check whether the link is still up.
    fn is_connected(&self) -> bool;

    /// Human-readable peer name for logs.
    fn peer_label(&self) -> &str;
}

/// In-process transport backed by tokio mpsc channels.
pub struct MemoryTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    /// Shared by both ends; flips to false when either closes.
    link: Arc<watch::Sender<bool>>,
    peer_label: String,
}

impl MemoryTransport {
    /// Create a connected pair. `a` talks to `b` and vice versa.
    pub fn pair(label_a: &str, label_b: &str) -> (MemoryTransport, MemoryTransport) {
        let (tx_ab, rx_ab) = mpsc::channel(64);
        let (tx_ba, rx_ba) = mpsc::channel(64);
        let (link, _) = watch::channel(true);
        let link = Arc::new(link);
        let closed = Arc::new(AtomicBool::new(false));

        let a = MemoryTransport {
            tx: tx_ab,
            rx: Arc::new(Mutex::new(rx_ba)),
            closed: Arc::clone(&closed),
            link: Arc::clone(&link),
            peer_label: label_b.to_string(),
        };
        let b = MemoryTransport {
            tx: tx_ba,
            rx: Arc::new(Mutex::new(rx_ab)),
            closed,
            link,
            peer_label: label_a.to_string(),
        };
        (a, b)
    }

    /// Drop the link as if the network went away.
    pub fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.link.send_replace(false);
    }
}

/// Resolves once the link goes down.
async fn link_down(mut link: watch::Receiver<bool>) {
    loop {
        let up = *link.borrow_and_update();
        if !up || link.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    /// Frames already delivered are still handed out after the link drops.
    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let down = link_down(self.link.subscribe());
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            frame = rx.recv() => frame.ok_or(TransportError::Disconnected),
            _ = down => Err(TransportError::Disconnected),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.disconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn peer_label(&self) -> &str {
        &self.peer_label
    }
}
