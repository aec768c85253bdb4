//! Per-peer sync session
//!
//! On connect both sides send their version summary. Each side answers a
//! summary with the changes the peer is missing, and keeps pushing new ones
//! whenever its own document moves on, whether the change was local or
//! merged from some other peer. A dropped link just ends the session;
//! reconnecting starts over with fresh summaries and nothing is lost.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::message::{batches, SyncMessage};
use super::transport::Transport;
use crate::convergent::Horizon;
use crate::error::{MergeError, SyncError, TransportError};
use crate::replica::Replica;

/// Counters for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_sent: usize,
    pub frames_received: usize,
    pub changes_sent: usize,
    pub changes_received: usize,
    /// Batches that arrived ahead of their parents.
    pub gaps: usize,
}

/// What we believe the peer holds.
#[derive(Default)]
struct PeerState {
    /// `None` until the peer's first summary arrives.
    known: Option<Horizon>,
}

/// Handle to a running session.
pub struct SyncSession {
    peer: String,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<SyncStats, SyncError>>,
}

impl SyncSession {
    pub(crate) fn start(replica: Replica, transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let peer = transport.peer_label().to_string();
        let task = tokio::spawn(run(replica, transport, shutdown_rx));
        Self {
            peer,
            shutdown_tx,
            task,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Ask the session to end. The link is closed on the way out.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end.
    pub async fn join(self) -> Result<SyncStats, SyncError> {
        self.task
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

async fn run(
    replica: Replica,
    transport: Arc<dyn Transport>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<SyncStats, SyncError> {
    let label = transport.peer_label().to_string();
    let mut stats = SyncStats::default();
    log::info!("Sync with {} started for {}", label, replica.doc_id());

    // Writes run on their own task so a full link never stalls reads
    let (outbound, queued) = mpsc::unbounded_channel();
    let mut writer = tokio::spawn(write_frames(transport.clone(), queued));

    let result = exchange(
        &replica,
        transport.as_ref(),
        &outbound,
        &mut writer,
        &mut shutdown_rx,
        &mut stats,
    )
    .await;

    drop(outbound);
    let _ = transport.close().await;
    writer.abort();
    match &result {
        Ok(()) => log::info!(
            "Sync with {} ended: sent {} change(s), received {}",
            label,
            stats.changes_sent,
            stats.changes_received
        ),
        Err(e) => log::warn!("Sync with {} failed: {}", label, e),
    }
    result.map(|()| stats)
}

async fn write_frames(
    transport: Arc<dyn Transport>,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<(), TransportError> {
    while let Some(frame) = queued.recv().await {
        transport.send(&frame).await?;
    }
    Ok(())
}

/// The message loop. Returns `Ok` when the link goes down or on shutdown.
async fn exchange(
    replica: &Replica,
    transport: &dyn Transport,
    outbound: &Outbound,
    writer: &mut JoinHandle<Result<(), TransportError>>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    stats: &mut SyncStats,
) -> Result<(), SyncError> {
    let doc_id = replica.doc_id();
    let label = transport.peer_label();
    let mut ticks = replica.version_ticks();
    let mut peer = PeerState::default();

    let hello = SyncMessage::VersionSummary {
        doc_id,
        summary: replica.summary(),
    };
    if !send(outbound, &hello, stats)? {
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = transport.recv() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(TransportError::Disconnected | TransportError::Closed) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                stats.frames_received += 1;

                let msg = match SyncMessage::from_cbor(&frame) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("Dropping undecodable frame from {}: {}", label, e);
                        continue;
                    }
                };
                if msg.doc_id() != doc_id {
                    return Err(SyncError::WrongDocument(msg.doc_id()));
                }

                let up = match msg {
                    SyncMessage::VersionSummary { summary, .. } => {
                        peer.known = Some(summary);
                        push_missing(replica, outbound, &mut peer, stats)?
                    }
                    SyncMessage::ChangeBatch { changes, .. } => {
                        stats.changes_received += changes.len();
                        if let Some(known) = peer.known.as_mut() {
                            for change in &changes {
                                known.record(&change.id);
                            }
                        }
                        match replica.merge_remote(changes) {
                            Ok(_) => true,
                            Err(MergeError::HistoryGap { missing, .. }) => {
                                stats.gaps += 1;
                                log::warn!(
                                    "History gap from {} ({} missing parents), resending summary",
                                    label,
                                    missing.len()
                                );
                                let summary = SyncMessage::VersionSummary {
                                    doc_id,
                                    summary: replica.summary(),
                                };
                                send(outbound, &summary, stats)?
                            }
                        }
                    }
                };
                if !up {
                    return Ok(());
                }
            }
            tick = ticks.recv() => {
                match tick {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if !push_missing(replica, outbound, &mut peer, stats)? {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }
            written = &mut *writer => {
                return match written {
                    Ok(Ok(())) | Ok(Err(TransportError::Disconnected | TransportError::Closed)) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(SyncError::Task(e.to_string())),
                };
            }
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}

type Outbound = mpsc::UnboundedSender<Vec<u8>>;

/// Queue everything the peer is missing. Returns false if the link is down.
fn push_missing(
    replica: &Replica,
    outbound: &Outbound,
    peer: &mut PeerState,
    stats: &mut SyncStats,
) -> Result<bool, SyncError> {
    let Some(known) = peer.known.as_mut() else {
        return Ok(true);
    };
    let changes = replica.changes_since(known);
    if changes.is_empty() {
        return Ok(true);
    }

    let max = replica.config().sync.max_batch_changes;
    for frame in batches(replica.doc_id(), changes, max) {
        if let SyncMessage::ChangeBatch { changes, .. } = &frame {
            for change in changes {
                known.record(&change.id);
            }
            stats.changes_sent += changes.len();
        }
        if !send(outbound, &frame, stats)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Hand a frame to the writer. Returns false once the writer has stopped.
fn send(outbound: &Outbound, msg: &SyncMessage, stats: &mut SyncStats) -> Result<bool, SyncError> {
    let frame = msg.to_cbor()?;
    if outbound.send(frame).is_err() {
        return Ok(false);
    }
    stats.frames_sent += 1;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicaConfig;
    use crate::convergent::ChangeBuilder;
    use crate::sync::MemoryTransport;
    use uuid::Uuid;

    fn replica() -> Replica {
        Replica::new(
            Uuid::nil(),
            ReplicaConfig {
                actor_id: Some("A".into()),
                ..Default::default()
            },
        )
    }

    async fn next(peer: &MemoryTransport) -> SyncMessage {
        SyncMessage::from_cbor(&peer.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_answers_summary_with_missing_changes() {
        let replica = replica();
        replica
            .apply_change(ChangeBuilder::new().add_room("r1", "One", 5, 0))
            .unwrap();
        let (ours, theirs) = MemoryTransport::pair("A", "raw");
        let session = replica.connect(Arc::new(ours));

        assert!(matches!(next(&theirs).await, SyncMessage::VersionSummary { .. }));
        let empty = SyncMessage::VersionSummary {
            doc_id: Uuid::nil(),
            summary: Horizon::new(),
        };
        theirs.send(&empty.to_cbor().unwrap()).await.unwrap();

        match next(&theirs).await {
            SyncMessage::ChangeBatch { changes, .. } => assert_eq!(changes.len(), 1),
            other => panic!("expected a batch, got {:?}", other),
        }

        session.stop();
        let stats = session.join().await.unwrap();
        assert_eq!(stats.changes_sent, 1);
        assert_eq!(stats.frames_received, 1);
    }

    #[tokio::test]
    async fn test_garbage_frames_are_skipped() {
        let replica = replica();
        replica
            .apply_change(ChangeBuilder::new().add_room("r1", "One", 5, 0))
            .unwrap();
        let (ours, theirs) = MemoryTransport::pair("A", "raw");
        let session = replica.connect(Arc::new(ours));
        let _hello = next(&theirs).await;

        theirs.send(b"not cbor at all").await.unwrap();
        let empty = SyncMessage::VersionSummary {
            doc_id: Uuid::nil(),
            summary: Horizon::new(),
        };
        theirs.send(&empty.to_cbor().unwrap()).await.unwrap();
        assert!(matches!(next(&theirs).await, SyncMessage::ChangeBatch { .. }));

        theirs.close().await.unwrap();
        let stats = session.join().await.unwrap();
        assert_eq!(stats.frames_received, 2);
    }
}
