//! Session controller — role selection, key provisioning, lifecycle.
//!
//! The collaborator-facing entry point. Picks a role (listener or
//! dialer), materializes key material, opens the connection, and starts
//! the channel. Startup fails fast: a key or socket error aborts before
//! any task is spawned. A listener's accept runs on its own task so the
//! caller is never blocked waiting for a peer.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use parley_core::config::ParleyConfig;
use parley_core::keys::{KeyError, KeyMaterial};

use crate::channel::{Channel, ChannelError, ChannelState};
use crate::connection::{Connection, NetError};
use crate::event::SessionEvent;

// ── Key provisioning ──────────────────────────────────────────────────────────

/// Where a session's key material comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Generate fresh keys and persist them to the configured key path
    /// so the other peer can load the same file.
    Generate,
    /// Load previously shared keys from a file.
    LoadFrom(PathBuf),
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct SessionController {
    config: ParleyConfig,
}

impl SessionController {
    pub fn new(config: ParleyConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ParleyConfig::default())
    }

    /// Start in the listener role: bind now, accept in the background.
    ///
    /// Returns as soon as the socket is bound. The peer connecting later
    /// (or the accept failing) is reported on the event stream.
    pub async fn act_as_listener(
        &self,
        bind_addr: &str,
        port: u16,
        key_source: KeySource,
    ) -> Result<Session, StartError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let keys = self.provision_keys(key_source, &events_tx)?;
        let mut connection = Connection::listen(bind_addr, port).await?;
        let local_addr = connection.local_addr();

        let channel = Channel::new(keys, events_tx.clone());
        send_status(
            &events_tx,
            match local_addr {
                Some(addr) => format!("listening on {addr}"),
                None => format!("listening on {bind_addr}:{port}"),
            },
        );

        // Accept exactly one peer, unless the session closes first.
        let accept_channel = channel.clone();
        let accept_events = events_tx;
        let mut shutdown = channel.subscribe_shutdown();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("accept task shutting down");
                }
                result = connection.accept() => match result {
                    Ok(peer) => {
                        send_status(
                            &accept_events,
                            format!("peer connected from {}", peer.peer_addr()),
                        );
                        accept_channel.establish(peer).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        send_status(&accept_events, format!("accept failed: {e}"));
                        accept_channel.close().await;
                    }
                }
            }
        });

        Ok(Session {
            channel,
            events: Some(events_rx),
            local_addr,
        })
    }

    /// Start in the dialer role: connect now, established on return.
    pub async fn act_as_dialer(
        &self,
        remote_addr: &str,
        port: u16,
        key_source: KeySource,
    ) -> Result<Session, StartError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let keys = self.provision_keys(key_source, &events_tx)?;
        let timeout = self.config.network.connect_timeout();
        let peer = Connection::dial(remote_addr, port, timeout).await?;

        send_status(&events_tx, format!("connected to {}", peer.peer_addr()));

        let channel = Channel::new(keys, events_tx);
        channel.establish(peer).await;

        Ok(Session {
            channel,
            events: Some(events_rx),
            local_addr: None,
        })
    }

    /// Materialize keys per the chosen source. Loading failures are
    /// fatal to startup; a failure to persist freshly generated keys is
    /// only reported, since the keys are already in memory.
    fn provision_keys(
        &self,
        source: KeySource,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<KeyMaterial, StartError> {
        match source {
            KeySource::LoadFrom(path) => {
                let keys = KeyMaterial::load_from_path(&path)?;
                tracing::info!(path = %path.display(), fingerprint = keys.fingerprint(), "keys loaded");
                send_status(
                    events,
                    format!(
                        "keys loaded from {} (fingerprint {})",
                        path.display(),
                        keys.fingerprint()
                    ),
                );
                Ok(keys)
            }
            KeySource::Generate => {
                let keys = KeyMaterial::generate();
                let path = &self.config.keys.path;
                match keys.save_to_path(path) {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), fingerprint = keys.fingerprint(), "keys generated and saved");
                        send_status(
                            events,
                            format!(
                                "new keys saved to {} (fingerprint {})",
                                path.display(),
                                keys.fingerprint()
                            ),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to persist generated keys");
                        send_status(
                            events,
                            format!("keys generated, but saving to {} failed: {e}", path.display()),
                        );
                    }
                }
                Ok(keys)
            }
        }
    }
}

fn send_status(events: &mpsc::UnboundedSender<SessionEvent>, text: String) {
    let _ = events.send(SessionEvent::Status(text));
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A running session: the collaborator's handle to one channel.
pub struct Session {
    channel: Channel,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        self.channel.send(text).await
    }

    /// Idempotent; also unblocks a still-pending accept.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    pub async fn state(&self) -> ChannelState {
        self.channel.state().await
    }

    /// The inbound event stream. Yields once; the stream has a single
    /// consumer.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// The bound address in the listener role (None for dialers).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Fail-fast startup errors. Nothing is left running when one of these
/// is returned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("key setup failed: {0}")]
    Key(#[from] KeyError),

    #[error("network setup failed: {0}")]
    Net(#[from] NetError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
