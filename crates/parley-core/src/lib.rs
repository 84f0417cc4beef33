//! parley-core — key material, frame transform, and configuration.
//! All other parley crates depend on this one.

pub mod config;
pub mod frame;
pub mod keys;

pub use frame::{open, seal, FrameError, WireFrame};
pub use keys::{KeyError, KeyMaterial};
