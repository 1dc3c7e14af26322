//! High-level MPV client with command methods.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::MpvError;
use super::events::{DispatchMode, SubscriptionId};
use super::ipc::{ConnectionState, MpvIpc, Request};
use super::protocol::{MpvEvent, Outcome};
use super::transport::{self, Transport};
use crate::config::ClientOptions;

/// How `loadfile` treats the current playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFileMode {
  Replace,
  Append,
  AppendPlay,
}

impl LoadFileMode {
  pub fn as_str(self) -> &'static str {
    match self {
      LoadFileMode::Replace => "replace",
      LoadFileMode::Append => "append",
      LoadFileMode::AppendPlay => "append-play",
    }
  }
}

/// Flags for the `seek` command; several are joined with `+`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFlag {
  Relative,
  Absolute,
  Exact,
  Keyframes,
  RelativePercent,
  AbsolutePercent,
}

impl SeekFlag {
  pub fn as_str(self) -> &'static str {
    match self {
      SeekFlag::Relative => "relative",
      SeekFlag::Absolute => "absolute",
      SeekFlag::Exact => "exact",
      SeekFlag::Keyframes => "keyframes",
      SeekFlag::RelativePercent => "relative-percent",
      SeekFlag::AbsolutePercent => "absolute-percent",
    }
  }
}

/// High-level MPV client. Clones share the same connection.
#[derive(Clone)]
pub struct MpvClient {
  ipc: Arc<MpvIpc>,
  observer_id: Arc<AtomicI64>,
}

impl fmt::Debug for MpvClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MpvClient")
      .field("state", &self.state())
      .finish()
  }
}

impl MpvClient {
  /// Connect to the IPC endpoint in `options`, retrying with backoff.
  pub async fn connect(options: &ClientOptions) -> Result<Self, MpvError> {
    options.validate().map_err(MpvError::InvalidConfig)?;
    let (reader, writer) = transport::connect_with_retry(options).await?;
    log::info!("MPV client connected to {}", options.socket_path);
    Ok(Self::from_split(reader, writer, options))
  }

  /// Wrap an already connected duplex stream.
  pub fn from_transport<T: Transport>(stream: T, options: &ClientOptions) -> Self {
    let (reader, writer) = tokio::io::split(stream);
    Self::from_split(reader, writer, options)
  }

  /// Wrap separately owned read and write halves.
  pub fn from_split<R, W>(reader: R, writer: W, options: &ClientOptions) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    Self {
      ipc: Arc::new(MpvIpc::new(
        reader,
        writer,
        options.queue_capacity,
        options.event_buffer,
      )),
      observer_id: Arc::new(AtomicI64::new(0)),
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.ipc.state()
  }

  /// Check if connected.
  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Open
  }

  /// Close the connection, resolving every unanswered command first.
  pub async fn close(&self) -> Result<(), MpvError> {
    self.ipc.close().await
  }

  /// Wait until the connection is closed (by `close` or by MPV going away).
  pub async fn closed(&self) {
    self.ipc.closed().await
  }

  // Commands

  /// Send a command to MPV. See https://mpv.io/manual/stable/#list-of-input-commands
  /// for a list of commands and their arguments.
  pub async fn command(&self, name: &str, args: Vec<Value>) -> Outcome {
    self.ipc.send_command(name, args, None).await
  }

  /// Like [`command`](Self::command), giving up with `Cancelled` once `cancel` fires.
  pub async fn command_cancellable(
    &self,
    name: &str,
    args: Vec<Value>,
    cancel: &CancellationToken,
  ) -> Outcome {
    self.ipc.send_command(name, args, Some(cancel)).await
  }

  /// Like [`command`](Self::command), giving up with `Cancelled` after `timeout`.
  pub async fn command_with_timeout(
    &self,
    name: &str,
    args: Vec<Value>,
    timeout: Duration,
  ) -> Outcome {
    match tokio::time::timeout(timeout, self.command(name, args)).await {
      Ok(outcome) => outcome,
      Err(_) => {
        log::debug!("MPV command {} timed out after {:?}", name, timeout);
        Err(MpvError::Cancelled)
      }
    }
  }

  /// Send a command that MPV runs asynchronously and return without waiting.
  pub async fn command_async(
    &self,
    name: &str,
    args: Vec<Value>,
    cancel: Option<&CancellationToken>,
  ) -> Result<Request, MpvError> {
    self.ipc.start_request(name, args, true, cancel).await
  }

  async fn send(&self, name: &str, args: Vec<Value>) -> Result<(), MpvError> {
    self.command(name, args).await.map(|_| ())
  }

  // Events

  /// Register `callback` for every event. `Sync` callbacks run one at a time in
  /// event order; `Concurrent` ones each get their own task.
  pub fn subscribe<F>(&self, mode: DispatchMode, callback: F) -> SubscriptionId
  where
    F: Fn(&MpvEvent) + Send + Sync + 'static,
  {
    self.ipc.events().subscribe(mode, callback)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.ipc.events().unsubscribe(id)
  }

  /// Observe a property. `callback` receives the new value on each change.
  pub async fn observe_property<F>(
    &self,
    property: &str,
    callback: F,
  ) -> Result<PropertyObserver, MpvError>
  where
    F: Fn(Option<&Value>) + Send + Sync + 'static,
  {
    let observer_id = self.observer_id.fetch_add(1, Ordering::Relaxed) + 1;
    let subscription = self.subscribe(DispatchMode::Sync, move |event| {
      if event.event == "property-change" && event.id == Some(observer_id) {
        callback(event.data());
      }
    });

    if let Err(e) = self
      .send("observe_property", vec![observer_id.into(), property.into()])
      .await
    {
      self.unsubscribe(subscription);
      return Err(e);
    }

    log::debug!("Observing MPV property {} as {}", property, observer_id);
    Ok(PropertyObserver {
      client: self.clone(),
      observer_id,
      subscription,
    })
  }

  // Playback

  pub async fn play(&self) -> Result<(), MpvError> {
    self.set_property("pause", false).await
  }

  pub async fn pause(&self) -> Result<(), MpvError> {
    self.set_property("pause", true).await
  }

  /// Seek by `position` seconds (or percent), interpreted by `flags`.
  pub async fn seek(&self, position: f64, flags: &[SeekFlag]) -> Result<(), MpvError> {
    let mut args = vec![Value::from(position)];
    if !flags.is_empty() {
      let joined: Vec<&str> = flags.iter().map(|f| f.as_str()).collect();
      args.push(joined.join("+").into());
    }
    self.send("seek", args).await
  }

  /// Load a file or URL for playback.
  pub async fn loadfile(&self, url: &str, mode: LoadFileMode) -> Result<(), MpvError> {
    log::info!("Loading file: {}", url);
    self.send("loadfile", vec![url.into(), mode.as_str().into()]).await
  }

  /// Quit MPV. The connection closes once MPV goes away.
  pub async fn quit(&self) -> Result<(), MpvError> {
    self.send("quit", Vec::new()).await
  }

  // Properties

  pub async fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<(), MpvError> {
    self
      .send("set_property", vec![name.into(), value.into()])
      .await
  }

  pub async fn get_property(&self, name: &str) -> Result<Value, MpvError> {
    self.command("get_property", vec![name.into()]).await
  }

  pub async fn get_property_bool(&self, name: &str) -> Result<bool, MpvError> {
    let value = self.get_property(name).await?;
    value.as_bool().ok_or_else(|| unexpected(name, value))
  }

  pub async fn get_property_f64(&self, name: &str) -> Result<f64, MpvError> {
    let value = self.get_property(name).await?;
    value.as_f64().ok_or_else(|| unexpected(name, value))
  }

  pub async fn get_property_string(&self, name: &str) -> Result<String, MpvError> {
    match self.get_property(name).await? {
      Value::String(s) => Ok(s),
      other => Err(unexpected(name, other)),
    }
  }

  pub async fn set_volume(&self, volume: f64) -> Result<(), MpvError> {
    self.set_property("volume", volume).await
  }

  pub async fn set_mute(&self, mute: bool) -> Result<(), MpvError> {
    self.set_property("mute", mute).await
  }

  pub async fn set_speed(&self, speed: f64) -> Result<(), MpvError> {
    self.set_property("speed", speed).await
  }

  pub async fn set_loop(&self, looping: bool) -> Result<(), MpvError> {
    self.set_property("loop", looping).await
  }

  /// Jump to `position` seconds.
  pub async fn set_position(&self, position: f64) -> Result<(), MpvError> {
    self.set_property("time-pos", position).await
  }

  pub async fn get_paused(&self) -> Result<bool, MpvError> {
    self.get_property_bool("pause").await
  }

  pub async fn get_volume(&self) -> Result<f64, MpvError> {
    self.get_property_f64("volume").await
  }

  pub async fn get_mute(&self) -> Result<bool, MpvError> {
    self.get_property_bool("mute").await
  }

  pub async fn get_speed(&self) -> Result<f64, MpvError> {
    self.get_property_f64("speed").await
  }

  pub async fn get_loop(&self) -> Result<bool, MpvError> {
    self.get_property_bool("loop").await
  }

  /// Current time position in seconds.
  pub async fn get_position(&self) -> Result<f64, MpvError> {
    self.get_property_f64("time-pos").await
  }

  pub async fn get_duration(&self) -> Result<f64, MpvError> {
    self.get_property_f64("duration").await
  }

  pub async fn get_filename(&self) -> Result<String, MpvError> {
    self.get_property_string("filename").await
  }

  pub async fn get_idle_active(&self) -> Result<bool, MpvError> {
    self.get_property_bool("idle-active").await
  }
}

fn unexpected(property: &str, value: Value) -> MpvError {
  MpvError::UnexpectedType {
    property: property.to_string(),
    value,
  }
}

/// Registration returned by [`MpvClient::observe_property`].
pub struct PropertyObserver {
  client: MpvClient,
  observer_id: i64,
  subscription: SubscriptionId,
}

impl PropertyObserver {
  pub fn observer_id(&self) -> i64 {
    self.observer_id
  }

  /// Stop observing: no further callbacks, and MPV is told to unobserve.
  pub async fn unobserve(self) -> Result<(), MpvError> {
    self.client.unsubscribe(self.subscription);
    self
      .client
      .send("unobserve_property", vec![self.observer_id.into()])
      .await
  }
}
