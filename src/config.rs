//! Connection and process configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mpv::default_socket_path;

/// Options for connecting to an MPV IPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
  /// Socket path (Unix) or pipe name (Windows).
  #[serde(default = "default_socket_path")]
  pub socket_path: String,

  /// How long a single connection attempt may take, in milliseconds.
  #[serde(default = "default_dial_timeout_ms")]
  pub dial_timeout_ms: u64,

  /// Connection attempts before giving up.
  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,

  /// Delay before the second attempt, in milliseconds. Doubles per attempt.
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,

  /// Commands that may wait for the writer before callers are held up.
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,

  /// Events buffered for subscribers before new ones are dropped.
  #[serde(default = "default_event_buffer")]
  pub event_buffer: usize,
}

fn default_dial_timeout_ms() -> u64 {
  5000
}

fn default_connect_retries() -> u32 {
  5
}

fn default_retry_delay_ms() -> u64 {
  100
}

fn default_queue_capacity() -> usize {
  32
}

fn default_event_buffer() -> usize {
  64
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      socket_path: default_socket_path(),
      dial_timeout_ms: default_dial_timeout_ms(),
      connect_retries: default_connect_retries(),
      retry_delay_ms: default_retry_delay_ms(),
      queue_capacity: default_queue_capacity(),
      event_buffer: default_event_buffer(),
    }
  }
}

impl ClientOptions {
  pub fn with_socket_path(mut self, socket_path: impl Into<String>) -> Self {
    self.socket_path = socket_path.into();
    self
  }

  pub fn dial_timeout(&self) -> Duration {
    Duration::from_millis(self.dial_timeout_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if self.socket_path.trim().is_empty() {
      return Err("Socket path cannot be empty".to_string());
    }
    if self.dial_timeout_ms == 0 {
      return Err("Dial timeout must be greater than zero".to_string());
    }
    if self.connect_retries == 0 {
      return Err("At least one connection attempt is required".to_string());
    }
    if self.queue_capacity == 0 {
      return Err("Queue capacity must be at least 1".to_string());
    }
    if self.event_buffer == 0 {
      return Err("Event buffer must be at least 1".to_string());
    }
    Ok(())
  }
}

/// Where a standard stream of the MPV process goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Redirect {
  #[default]
  Null,
  Inherit,
}

/// Options for spawning an MPV process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOptions {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  #[serde(default)]
  pub stdin: Redirect,

  #[serde(default)]
  pub stdout: Redirect,

  #[serde(default)]
  pub stderr: Redirect,

  /// How to reach the IPC server the process is told to open.
  #[serde(default)]
  pub client: ClientOptions,
}

impl Default for ProcessOptions {
  fn default() -> Self {
    Self {
      mpv_path: None,
      mpv_args: Vec::new(),
      stdin: Redirect::Null,
      stdout: Redirect::Null,
      stderr: Redirect::Null,
      client: ClientOptions::default(),
    }
  }
}

impl ProcessOptions {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if let Some(path) = &self.mpv_path {
      if path.trim().is_empty() {
        return Err("MPV path cannot be empty when set".to_string());
      }
    }
    if self
      .mpv_args
      .iter()
      .any(|arg| arg.starts_with("--input-ipc-server"))
    {
      return Err("--input-ipc-server is set from the socket path".to_string());
    }
    self.client.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    assert!(ClientOptions::default().validate().is_ok());
    assert!(ProcessOptions::default().validate().is_ok());
  }

  #[test]
  fn missing_fields_take_defaults() {
    let options: ClientOptions =
      serde_json::from_str(r#"{"socketPath":"/tmp/custom.sock","connectRetries":2}"#).unwrap();
    assert_eq!(options.socket_path, "/tmp/custom.sock");
    assert_eq!(options.connect_retries, 2);
    assert_eq!(options.dial_timeout(), Duration::from_secs(5));
    assert_eq!(options.event_buffer, 64);
  }

  #[test]
  fn process_options_from_json() {
    let options: ProcessOptions =
      serde_json::from_str(r#"{"mpvArgs":["--no-video"],"stderr":"inherit"}"#).unwrap();
    assert_eq!(options.mpv_args, vec!["--no-video".to_string()]);
    assert_eq!(options.stderr, Redirect::Inherit);
    assert_eq!(options.stdout, Redirect::Null);
    assert_eq!(options.client, ClientOptions::default());
  }

  #[test]
  fn rejects_bad_values() {
    let options = ClientOptions {
      event_buffer: 0,
      ..ClientOptions::default()
    };
    assert!(options.validate().is_err());

    let options = ClientOptions::default().with_socket_path("  ");
    assert!(options.validate().is_err());

    let options = ProcessOptions {
      mpv_args: vec!["--input-ipc-server=/tmp/other".into()],
      ..ProcessOptions::default()
    };
    assert!(options.validate().is_err());
  }
}
