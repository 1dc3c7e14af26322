//! MPV client error types.

use thiserror::Error;

use super::process::ProcessError;

/// Errors surfaced by the MPV connection and client.
#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Transport error: {0}")]
  Transport(#[from] std::io::Error),

  #[error("Protocol error: {0}")]
  Protocol(String),

  /// MPV answered the request with an `error` other than `"success"`.
  #[error("MPV command failed: {error}")]
  CommandFailed {
    error: String,
    data: Option<serde_json::Value>,
  },

  #[error("Request cancelled")]
  Cancelled,

  #[error("Connection closed")]
  Closed,

  #[error("Property {property} has unexpected value: {value}")]
  UnexpectedType {
    property: String,
    value: serde_json::Value,
  },

  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
}

impl MpvError {
  /// True when the caller (or a deadline) cancelled the request.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, MpvError::Cancelled)
  }

  /// True when the request was refused or abandoned because the connection closed.
  pub fn is_closed(&self) -> bool {
    matches!(self, MpvError::Closed)
  }

  /// The error string MPV returned, for remote failures.
  pub fn remote_error(&self) -> Option<&str> {
    match self {
      MpvError::CommandFailed { error, .. } => Some(error),
      _ => None,
    }
  }
}
