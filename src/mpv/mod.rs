//! MPV IPC module - drives an external MPV player over its JSON IPC socket.
//!
//! Architecture:
//! - `protocol.rs` - JSON command/response/event types and line framing
//! - `pending.rs` - Table of written requests awaiting a reply
//! - `events.rs` - Fan-out of MPV events to subscribers
//! - `ipc.rs` - Connection core: writer and reader loops, cancellation, close
//! - `transport.rs` - Dialing (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `process.rs` - MPV binary detection and process spawning
//! - `client.rs` - High-level MPV client with command methods

mod client;
mod error;
mod events;
mod ipc;
mod pending;
mod process;
mod protocol;
pub mod transport;

pub use client::{LoadFileMode, MpvClient, PropertyObserver, SeekFlag};
pub use error::MpvError;
pub use events::{DispatchMode, EventHub, SubscriptionId};
pub use ipc::{ConnectionState, MpvIpc, Request};
pub use process::{
  cleanup_ipc, default_socket_path, find_mpv, incrementing_pid_socket_path,
  incrementing_socket_path, random_socket_path, MpvProcess, ProcessError,
};
pub use protocol::{DecodeError, MpvCommand, MpvEvent, MpvMessage, MpvResponse, Outcome};
