//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc
//!
//! Every message is one JSON object on its own line. Outgoing commands carry a
//! `request_id` that MPV echoes back in its reply; everything MPV sends without a
//! `request_id` but with an `event` field is an unsolicited event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::error::MpvError;

/// Terminal result of a command: the reply's `data` on success.
pub type Outcome = Result<Value, MpvError>;

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MpvCommand {
  /// Command name followed by its positional arguments.
  pub command: Vec<Value>,
  /// Ask MPV to run the command asynchronously on its side.
  #[serde(rename = "async")]
  pub is_async: bool,
  pub request_id: i64,
}

impl MpvCommand {
  /// Create a command named `name` with positional `args`.
  pub fn new(request_id: i64, name: &str, args: Vec<Value>) -> Self {
    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(Value::from(name));
    command.extend(args);
    Self {
      command,
      is_async: false,
      request_id,
    }
  }

  pub fn with_async(mut self, is_async: bool) -> Self {
    self.is_async = is_async;
    self
  }

  /// Command name (first element of the command array).
  pub fn name(&self) -> Option<&str> {
    self.command.first().and_then(Value::as_str)
  }

  /// Serialize to a single newline-terminated frame.
  pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
    let mut frame = serde_json::to_vec(self)?;
    frame.push(b'\n');
    Ok(frame)
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }

  /// Turn the reply into the outcome handed to the caller.
  pub fn into_outcome(self) -> Outcome {
    if self.is_success() {
      Ok(self.data.unwrap_or(Value::Null))
    } else {
      Err(MpvError::CommandFailed {
        error: self.error,
        data: self.data,
      })
    }
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "client-message").
  pub event: String,
  /// Observer ID for property-change events.
  #[serde(default)]
  pub id: Option<i64>,
  /// Remaining event fields (`name`, `data`, `reason`, `args`, ...).
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl MpvEvent {
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  /// Property name for property-change events.
  pub fn name(&self) -> Option<&str> {
    self.get("name").and_then(Value::as_str)
  }

  pub fn data(&self) -> Option<&Value> {
    self.get("data")
  }

  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub fn reason(&self) -> Option<&str> {
    self.get("reason").and_then(Value::as_str)
  }
}

/// Why a line could not be turned into a message.
#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("invalid JSON: {0}")]
  Json(#[from] serde_json::Error),

  /// Valid JSON, but the reply for `request_id` is missing required fields.
  #[error("malformed response for request {request_id}: {reason}")]
  MalformedResponse { request_id: i64, reason: String },

  #[error("malformed message: {0}")]
  Malformed(String),
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone, PartialEq)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse one line received from MPV.
  pub fn parse(line: &[u8]) -> Result<Self, DecodeError> {
    let value: Value = serde_json::from_slice(line)?;
    let Value::Object(object) = value else {
      return Err(DecodeError::Malformed("not a JSON object".into()));
    };

    if object.contains_key("event") {
      return serde_json::from_value(Value::Object(object))
        .map(MpvMessage::Event)
        .map_err(|e| DecodeError::Malformed(e.to_string()));
    }

    let request_id = match object.get("request_id") {
      Some(id) => id
        .as_i64()
        .ok_or_else(|| DecodeError::Malformed(format!("request_id is not an integer: {}", id)))?,
      None => {
        return Err(DecodeError::Malformed(
          "neither an event nor a response".into(),
        ))
      }
    };

    serde_json::from_value(Value::Object(object))
      .map(MpvMessage::Response)
      .map_err(|e| DecodeError::MalformedResponse {
        request_id,
        reason: e.to_string(),
      })
  }
}
