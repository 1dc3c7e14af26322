//! Async client for an external MPV player, speaking its JSON IPC protocol.
//!
//! Commands are matched to replies by request id, so any number of callers can
//! share one connection. Events are fanned out to subscribers.

pub mod config;
pub mod mpv;

pub use config::{ClientOptions, ProcessOptions, Redirect};
pub use mpv::{
  ConnectionState, DispatchMode, MpvClient, MpvError, MpvEvent, MpvIpc, MpvProcess, Outcome,
  Request, SubscriptionId,
};
