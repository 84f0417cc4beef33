//! parley-channel — the secure two-party message channel.
//!
//! Connection roles over TCP, the concurrent channel loop, and the
//! session controller that wires them together for a UI collaborator.

pub mod channel;
pub mod connection;
pub mod controller;
pub mod event;

pub use channel::{Channel, ChannelError, ChannelState};
pub use connection::{Connection, FrameReader, FrameWriter, NetError, PeerHandle, Role, MAX_FRAME_LEN};
pub use controller::{KeySource, Session, SessionController, StartError};
pub use event::SessionEvent;
