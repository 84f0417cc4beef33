//! The channel loop — concurrent send path and background receive loop.
//!
//! One `Channel` per session. The caller-driven send path seals and
//! writes frames under a single writer mutex; the receive loop runs on
//! its own task, owns the read half exclusively, and delivers events to
//! the collaborator over mpsc. A corrupt or forged incoming frame is
//! reported and skipped; a transport failure ends the session.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};

use parley_core::frame;
use parley_core::keys::KeyMaterial;

use crate::connection::{FrameReader, FrameWriter, NetError, PeerHandle};
use crate::event::SessionEvent;

// ── State ─────────────────────────────────────────────────────────────────────

/// Channel lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No peer yet (listener still waiting for its accept).
    Idle,
    /// Peer stream live; send and receive both active.
    Established,
    /// Torn down by explicit close, peer disconnect, or I/O failure.
    Closed,
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Handle to one session's channel. Cheap to clone; all clones share
/// the same state, writer, and shutdown signal.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

struct Shared {
    keys: KeyMaterial,
    state: Mutex<ChannelState>,
    writer: Mutex<Option<FrameWriter>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: broadcast::Sender<()>,
}

impl Channel {
    /// A channel in `Idle`, waiting for [`Channel::establish`].
    pub fn new(keys: KeyMaterial, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                keys,
                state: Mutex::new(ChannelState::Idle),
                writer: Mutex::new(None),
                events,
                shutdown,
            }),
        }
    }

    pub async fn state(&self) -> ChannelState {
        *self.shared.state.lock().await
    }

    /// Attach a connected peer and start the receive loop.
    ///
    /// No-op if the channel was closed while the peer was connecting;
    /// the late peer stream is dropped, which hangs up on them.
    pub async fn establish(&self, peer: PeerHandle) {
        {
            let mut state = self.shared.state.lock().await;
            if *state != ChannelState::Idle {
                tracing::debug!(peer = %peer.peer_addr(), "discarding peer for closed channel");
                return;
            }
            *state = ChannelState::Established;
        }
        tracing::info!(role = ?peer.role(), peer = %peer.peer_addr(), "channel established");
        let (reader, writer) = peer.into_split();
        *self.shared.writer.lock().await = Some(writer);

        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown.subscribe();
        tokio::spawn(receive_loop(shared, reader, shutdown));
    }

    /// Seal `text` and write it to the peer.
    ///
    /// Only valid in `Established`. A write failure closes the channel
    /// and is also reported on the event stream.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if *self.shared.state.lock().await != ChannelState::Established {
            return Err(ChannelError::NotConnected);
        }

        let wire = frame::seal(text.as_bytes(), &self.shared.keys).encode();

        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::NotConnected)?;
        match writer.write_frame(&wire).await {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(guard);
                tracing::warn!(error = %e, "send failed, closing channel");
                self.shared.emit_status(format!("send failed: {e}"));
                self.shared.close_internal().await;
                Err(ChannelError::Net(e))
            }
        }
    }

    /// Idempotent teardown: flips to `Closed`, unblocks a pending
    /// accept/read via the shutdown signal, and shuts the write half
    /// down so the peer sees EOF.
    pub async fn close(&self) {
        self.shared.close_internal().await;
    }

    /// A receiver on the shutdown signal, for tasks (like the listener's
    /// accept) that must stop when the channel closes.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shared.shutdown.subscribe()
    }
}

impl Shared {
    fn emit_status(&self, text: String) {
        let _ = self.events.send(SessionEvent::Status(text));
    }

    fn emit_message(&self, text: String) {
        let _ = self.events.send(SessionEvent::Message(text));
    }

    async fn close_internal(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Closed;
        }
        let _ = self.shutdown.send(());
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "write half shutdown failed");
            }
        }
        tracing::info!("channel closed");
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

async fn receive_loop(
    shared: Arc<Shared>,
    mut reader: FrameReader,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("receive loop shutting down");
                return;
            }

            result = reader.read_frame() => match result {
                Ok(Some(bytes)) => match frame::open(&bytes, &shared.keys) {
                    Ok(plaintext) => {
                        shared.emit_message(String::from_utf8_lossy(&plaintext).into_owned());
                    }
                    Err(e) => {
                        // One bad frame never ends the session.
                        // Report it and keep reading.
                        tracing::warn!(len = bytes.len(), error = %e, "rejected incoming frame");
                        shared.emit_status(format!("rejected incoming frame: {e}"));
                    }
                },
                Ok(None) => {
                    tracing::info!(peer = %reader.peer_addr(), "peer disconnected");
                    shared.emit_status("peer disconnected".to_string());
                    shared.close_internal().await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed, closing channel");
                    shared.emit_status(format!("receive failed: {e}"));
                    shared.close_internal().await;
                    return;
                }
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,

    #[error(transparent)]
    Net(#[from] NetError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
