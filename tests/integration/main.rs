//! Parley integration test harness.
//!
//! End-to-end scenarios over loopback TCP with ephemeral ports: both
//! roles started through the SessionController, key material handed off
//! through the persisted key file exactly as two real peers would do it.
//! No external environment is required.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use parley_channel::{Session, SessionEvent};

mod chat;
mod failures;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Per-test scratch directory for key files.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parley-it-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("failed to create scratch dir");
    dir
}

/// Wait (bounded) for the next event of any kind.
pub async fn next_event(events: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended unexpectedly")
}

/// Wait (bounded) for the next Message event, skipping status noise.
pub async fn next_message(events: &mut UnboundedReceiver<SessionEvent>) -> String {
    loop {
        if let SessionEvent::Message(text) = next_event(events).await {
            return text;
        }
    }
}

/// Wait (bounded) for a Status event containing `needle`.
pub async fn await_status(events: &mut UnboundedReceiver<SessionEvent>, needle: &str) -> String {
    loop {
        if let SessionEvent::Status(text) = next_event(events).await {
            if text.contains(needle) {
                return text;
            }
        }
    }
}

/// Poll (bounded) until the session reports the given state.
pub async fn await_state(session: &Session, wanted: parley_channel::ChannelState) {
    for _ in 0..500 {
        if session.state().await == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {wanted:?}");
}
