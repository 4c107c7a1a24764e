//! Foreign-side plugin host.
//!
//! Hosts one VST3 plugin for a native-side client process: a loopback TCP
//! protocol server drives plugin lifecycle, parameters, MIDI-style events
//! and the editor window, while audio blocks move through a client-owned
//! shared-memory region.
//!
//! Module map, in dependency order:
//!
//! - [`uid`]: interface UID layout and registry
//! - [`module`]: bundle resolution and dynamic linking
//! - [`session`]: component graph and session state machine
//! - [`audio`]: shared-memory region mapping and validation
//! - [`engine`]: activate/processing transitions and per-block marshalling
//! - [`params`]: parameter surface and the GUI edit ring
//! - [`editor`]: embeddable native editor window
//! - [`server`]: framed request dispatch over one connection

pub mod audio;
pub mod editor;
pub mod engine;
pub mod error;
pub mod module;
pub mod params;
pub mod server;
pub mod session;
pub mod uid;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{HostError, LoadStage, Result};
pub use server::{bind_loopback, ProtocolServer};
pub use session::PluginSession;
