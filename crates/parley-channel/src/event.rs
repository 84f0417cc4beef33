//! Events delivered from the channel to its collaborator.
//!
//! The channel never touches UI state directly. Everything a consumer
//! needs to display flows through one mpsc stream of these events.

/// One item on the collaborator's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Decrypted text received from the peer.
    Message(String),
    /// Informational or error text: connection lifecycle, rejected
    /// frames, key provisioning. Covers both the "info" and "error"
    /// sinks of a chat log.
    Status(String),
}
