//! Async IPC connection to MPV.
//!
//! One writer task owns the write half of the transport, one reader task owns
//! the read half. Callers never touch the transport: they queue a
//! [`PendingRequest`] for the writer and wait on its one-shot channel, which the
//! reader (or a cancellation, or the close drain) resolves.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::error::MpvError;
use super::events::EventHub;
use super::pending::{PendingRequest, PendingTable};
use super::protocol::{DecodeError, MpvCommand, MpvMessage, Outcome};

/// Lifecycle of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
  Open,
  Closing,
  Closed,
}

/// State shared between the handle, the loops and per-request watchers.
struct Shared {
  pending: PendingTable,
  events: Arc<EventHub>,
  state: watch::Sender<ConnectionState>,
  /// Stops both loops; cancelling it is what "closing the transport" means here.
  shutdown: CancellationToken,
  loops: TaskTracker,
  outgoing_tx: Sender<PendingRequest>,
  outgoing_rx: Receiver<PendingRequest>,
  /// Read error that ended the reader, handed to callers drained afterwards.
  read_failure: Mutex<Option<std::io::Error>>,
  /// Error from shutting down the write half, reported by `close`.
  write_failure: Mutex<Option<std::io::Error>>,
}

impl Shared {
  fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  async fn close(self: Arc<Self>) -> Result<(), MpvError> {
    let began = self.state.send_if_modified(|state| {
      if *state == ConnectionState::Open {
        *state = ConnectionState::Closing;
        true
      } else {
        false
      }
    });
    if !began {
      return Ok(());
    }

    log::info!("Closing MPV IPC connection");
    self.outgoing_tx.close();
    self.shutdown.cancel();
    self.loops.wait().await;

    let read_failure = self.read_failure.lock().take();
    let reason = |cancelled: bool| -> MpvError {
      match (&read_failure, cancelled) {
        (_, true) => MpvError::Cancelled,
        (Some(e), false) => MpvError::Transport(std::io::Error::new(e.kind(), e.to_string())),
        (None, false) => MpvError::Closed,
      }
    };

    let mut abandoned = 0;
    while let Ok(request) = self.outgoing_rx.try_recv() {
      let outcome = Err(reason(request.is_cancelled()));
      request.resolve(outcome);
      abandoned += 1;
    }
    let drained = self
      .pending
      .drain_with(|request| Err(reason(request.is_cancelled())));
    if abandoned + drained > 0 {
      log::info!(
        "MPV IPC closed with {} unanswered request(s) ({} never written)",
        abandoned + drained,
        abandoned
      );
    }

    self.events.close();
    self.state.send_replace(ConnectionState::Closed);
    log::info!("MPV IPC connection closed");

    match self.write_failure.lock().take() {
      Some(e) => Err(MpvError::Transport(e)),
      None => Ok(()),
    }
  }
}

/// Handle to an in-flight request.
///
/// Dropping the handle without waiting leaves the request running; use
/// [`Request::cancel`] to abandon it.
pub struct Request {
  id: i64,
  outcome_rx: oneshot::Receiver<Outcome>,
  cancel: CancellationToken,
}

impl Request {
  pub fn id(&self) -> i64 {
    self.id
  }

  /// Abandon the request. A reply that arrives later is dropped.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Token that cancels only this request.
  pub fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Wait for the outcome. Dropping this future cancels the request.
  pub async fn wait(self) -> Outcome {
    let _guard = self.cancel.clone().drop_guard();
    let mut outcome_rx = self.outcome_rx;
    tokio::select! {
      biased;
      outcome = &mut outcome_rx => outcome.unwrap_or(Err(MpvError::Closed)),
      _ = self.cancel.cancelled() => Err(MpvError::Cancelled),
    }
  }
}

/// MPV IPC connection.
pub struct MpvIpc {
  shared: Arc<Shared>,
  next_request_id: AtomicI64,
}

impl MpvIpc {
  /// Start the reader, writer and event dispatcher over an already connected transport.
  ///
  /// Must be called from within a tokio runtime.
  pub fn new<R, W>(reader: R, writer: W, queue_capacity: usize, event_buffer: usize) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    let (outgoing_tx, outgoing_rx) = async_channel::bounded(queue_capacity.max(1));
    let (state, _) = watch::channel(ConnectionState::Open);
    let shared = Arc::new(Shared {
      pending: PendingTable::new(),
      events: Arc::new(EventHub::new(event_buffer)),
      state,
      shutdown: CancellationToken::new(),
      loops: TaskTracker::new(),
      outgoing_tx,
      outgoing_rx,
      read_failure: Mutex::new(None),
      write_failure: Mutex::new(None),
    });

    shared.events.start();
    shared.loops.spawn(writer_loop(writer, shared.clone()));
    shared.loops.spawn(reader_loop(reader, shared.clone()));
    shared.loops.close();

    Self {
      shared,
      next_request_id: AtomicI64::new(1),
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.shared.state()
  }

  pub fn events(&self) -> &EventHub {
    &self.shared.events
  }

  /// Number of requests written and still waiting for a reply.
  pub fn pending_count(&self) -> usize {
    self.shared.pending.len()
  }

  /// Queue a command for the writer and return a handle to its outcome.
  ///
  /// The request is cancelled when `cancel` fires; cancelling the request
  /// itself never cancels `cancel`.
  pub async fn start_request(
    &self,
    name: &str,
    args: Vec<Value>,
    is_async: bool,
    cancel: Option<&CancellationToken>,
  ) -> Result<Request, MpvError> {
    if self.state() != ConnectionState::Open {
      return Err(MpvError::Closed);
    }

    let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
    let command = MpvCommand::new(id, name, args).with_async(is_async);
    let cancel = cancel.map(CancellationToken::child_token).unwrap_or_default();
    let settled = CancellationToken::new();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let request = PendingRequest::new(command, outcome_tx, cancel.clone(), settled.clone());

    tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(MpvError::Cancelled),
      _ = self.shared.shutdown.cancelled() => return Err(MpvError::Closed),
      queued = self.shared.outgoing_tx.send(request) => {
        if queued.is_err() {
          return Err(MpvError::Closed);
        }
      }
    }
    log::debug!("MPV command {} queued as request {}", name, id);

    let shared = self.shared.clone();
    let watched = cancel.clone();
    tokio::spawn(async move {
      tokio::select! {
        _ = settled.cancelled() => {}
        _ = watched.cancelled() => {
          if let Some(request) = shared.pending.remove(id) {
            log::debug!("MPV request {} cancelled while waiting for reply", id);
            request.resolve(Err(MpvError::Cancelled));
          }
        }
      }
    });

    Ok(Request {
      id,
      outcome_rx,
      cancel,
    })
  }

  /// Send a command and wait for its outcome.
  pub async fn send_command(
    &self,
    name: &str,
    args: Vec<Value>,
    cancel: Option<&CancellationToken>,
  ) -> Outcome {
    self.start_request(name, args, false, cancel).await?.wait().await
  }

  /// Close the connection. Every unanswered request is resolved before this
  /// returns. Calling it again, or while a close is running, is a no-op.
  pub async fn close(&self) -> Result<(), MpvError> {
    self.shared.clone().close().await
  }

  /// Wait until the connection has fully closed, however the close started.
  pub async fn closed(&self) {
    let mut state = self.shared.state.subscribe();
    let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    if self.state() != ConnectionState::Open {
      return;
    }
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(self.shared.clone().close());
      }
      Err(_) => {
        log::warn!("MPV IPC dropped outside a runtime; stopping loops without draining");
        self.shared.shutdown.cancel();
      }
    }
  }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
  writer.write_all(frame).await?;
  writer.flush().await
}

async fn writer_loop<W: AsyncWrite + Unpin>(mut writer: W, shared: Arc<Shared>) {
  log::info!("MPV IPC writer loop started");

  loop {
    let request = tokio::select! {
      biased;
      _ = shared.shutdown.cancelled() => break,
      request = shared.outgoing_rx.recv() => match request {
        Ok(request) => request,
        Err(_) => break,
      },
    };

    if request.is_cancelled() {
      request.resolve(Err(MpvError::Cancelled));
      continue;
    }

    let frame = match request.command().encode() {
      Ok(frame) => frame,
      Err(e) => {
        request.resolve(Err(MpvError::Protocol(format!("failed to encode command: {}", e))));
        continue;
      }
    };

    let id = request.id();
    let cancel = request.cancellation();
    // Registered before the write so an immediate reply always finds it.
    if let Err(duplicate) = shared.pending.insert(request) {
      log::error!("MPV request id {} is already pending", id);
      duplicate.resolve(Err(MpvError::Protocol(format!("duplicate request id {}", id))));
      continue;
    }
    // A cancel that fired before the insert found nothing to remove.
    if cancel.is_cancelled() {
      if let Some(request) = shared.pending.remove(id) {
        request.resolve(Err(MpvError::Cancelled));
      }
      continue;
    }

    let written = tokio::select! {
      biased;
      _ = shared.shutdown.cancelled() => break,
      written = write_frame(&mut writer, &frame) => written,
    };

    match written {
      Ok(()) => log::debug!("MPV request {} written", id),
      Err(e) => {
        log::error!("MPV IPC write error for request {}: {}", id, e);
        if let Some(request) = shared.pending.remove(id) {
          request.resolve(Err(MpvError::Transport(e)));
        }
      }
    }
  }

  if let Err(e) = writer.shutdown().await {
    log::warn!("MPV IPC writer shutdown error: {}", e);
    *shared.write_failure.lock() = Some(e);
  }
  log::info!("MPV IPC writer loop stopped");
}

async fn reader_loop<R: AsyncRead + Unpin>(reader: R, shared: Arc<Shared>) {
  log::info!("MPV IPC reader loop started");
  let mut buf_reader = BufReader::new(reader);
  let mut line = Vec::new();

  let ended_by_peer = loop {
    line.clear();
    let read = tokio::select! {
      biased;
      _ = shared.shutdown.cancelled() => break false,
      read = buf_reader.read_until(b'\n', &mut line) => read,
    };

    match read {
      Ok(0) => {
        log::info!("MPV IPC connection closed by peer");
        break true;
      }
      Ok(_) => route_line(&shared, &line),
      Err(e) => {
        log::error!("MPV IPC read error: {}", e);
        *shared.read_failure.lock() = Some(e);
        break true;
      }
    }
  };

  log::info!("MPV IPC reader loop stopped");
  if ended_by_peer && shared.state() == ConnectionState::Open {
    tokio::spawn(shared.clone().close());
  }
}

fn route_line(shared: &Shared, line: &[u8]) {
  let trimmed = line.trim_ascii();
  if trimmed.is_empty() {
    return;
  }

  match MpvMessage::parse(trimmed) {
    Ok(MpvMessage::Response(response)) => match shared.pending.remove(response.request_id) {
      Some(request) => {
        log::debug!("MPV reader: response for request_id={}", response.request_id);
        request.resolve(response.into_outcome());
      }
      None => log::debug!(
        "MPV reader: dropping response for unknown request_id={}",
        response.request_id
      ),
    },
    Ok(MpvMessage::Event(event)) => {
      log::debug!("MPV reader: event {}", event.event);
      shared.events.offer(event);
    }
    Err(DecodeError::MalformedResponse { request_id, reason }) => {
      log::warn!("Malformed MPV response for request_id={}: {}", request_id, reason);
      if let Some(request) = shared.pending.remove(request_id) {
        request.resolve(Err(MpvError::Protocol(reason)));
      }
    }
    Err(DecodeError::Json(e)) => {
      log::debug!("Ignoring non-JSON line from MPV: {}", e);
    }
    Err(e) => {
      log::warn!(
        "Failed to parse MPV message: {} - {}",
        e,
        String::from_utf8_lossy(trimmed)
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;
  use std::pin::Pin;
  use std::sync::atomic::AtomicBool;
  use std::task::{Context, Poll};
  use std::time::Duration;

  use serde_json::json;
  use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadBuf, ReadHalf, WriteHalf,
  };

  use crate::mpv::events::DispatchMode;

  /// The player's end of an in-memory transport.
  struct Peer {
    lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
  }

  impl Peer {
    async fn next_command(&mut self) -> Value {
      let line = self.lines.next_line().await.unwrap().expect("command line");
      serde_json::from_str(&line).unwrap()
    }

    async fn send(&mut self, value: Value) {
      let mut line = value.to_string();
      line.push('\n');
      self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, raw: &[u8]) {
      self.writer.write_all(raw).await.unwrap();
    }

    async fn reply(&mut self, request_id: i64, data: Value) {
      self
        .send(json!({"request_id": request_id, "error": "success", "data": data}))
        .await;
    }
  }

  fn connect() -> (MpvIpc, Peer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(ours);
    let (peer_reader, peer_writer) = tokio::io::split(theirs);
    let ipc = MpvIpc::new(reader, writer, 8, 8);
    let peer = Peer {
      lines: BufReader::new(peer_reader).lines(),
      writer: peer_writer,
    };
    (ipc, peer)
  }

  async fn wait_pending(ipc: &MpvIpc, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
      while ipc.pending_count() != count {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("pending count reached");
  }

  #[tokio::test]
  async fn get_property_reply_is_delivered() {
    let (ipc, mut peer) = connect();
    let request = ipc
      .start_request("get_property", vec![json!("pause")], false, None)
      .await
      .unwrap();

    let command = peer.next_command().await;
    assert_eq!(command["command"], json!(["get_property", "pause"]));
    assert_eq!(command["async"], json!(false));
    assert_eq!(command["request_id"], json!(request.id()));

    peer
      .send(json!({"request_id": request.id(), "error": "success", "data": false}))
      .await;
    assert_eq!(request.wait().await.unwrap(), json!(false));
    assert_eq!(ipc.pending_count(), 0);
  }

  #[tokio::test]
  async fn request_ids_are_per_connection_and_increasing() {
    let (ipc, mut peer) = connect();
    let first = ipc.start_request("a", vec![], false, None).await.unwrap();
    let second = ipc.start_request("b", vec![], true, None).await.unwrap();
    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 2);

    assert_eq!(peer.next_command().await["request_id"], json!(1));
    let async_command = peer.next_command().await;
    assert_eq!(async_command["request_id"], json!(2));
    assert_eq!(async_command["async"], json!(true));

    let (other, _other_peer) = connect();
    let fresh = other.start_request("c", vec![], false, None).await.unwrap();
    assert_eq!(fresh.id(), 1);
  }

  #[tokio::test]
  async fn out_of_order_replies_reach_their_callers() {
    let (ipc, mut peer) = connect();
    let one = ipc.start_request("get_property", vec![json!("volume")], false, None).await.unwrap();
    let two = ipc.start_request("get_property", vec![json!("speed")], false, None).await.unwrap();
    peer.next_command().await;
    peer.next_command().await;

    peer.reply(two.id(), json!(1.5)).await;
    peer.reply(one.id(), json!(80.0)).await;

    assert_eq!(two.wait().await.unwrap(), json!(1.5));
    assert_eq!(one.wait().await.unwrap(), json!(80.0));
  }

  #[tokio::test]
  async fn remote_failure_carries_error_and_data() {
    let (ipc, mut peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("nope")], false, None).await.unwrap();
    peer.next_command().await;
    peer
      .send(json!({"request_id": request.id(), "error": "property not found", "data": {"hint": 1}}))
      .await;

    match request.wait().await {
      Err(MpvError::CommandFailed { error, data }) => {
        assert_eq!(error, "property not found");
        assert_eq!(data, Some(json!({"hint": 1})));
      }
      other => panic!("expected remote failure, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn noise_lines_are_ignored() {
    let (ipc, mut peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("mute")], false, None).await.unwrap();
    peer.next_command().await;

    peer.send_raw(b"this is not json\n\n").await;
    peer.send_raw(&[0xff, 0xfe, b'\n']).await;
    peer.send(json!({"something": "else"})).await;
    peer.send(json!({"request_id": 999, "error": "success"})).await;
    peer.reply(request.id(), json!(true)).await;

    assert_eq!(request.wait().await.unwrap(), json!(true));
    assert_eq!(ipc.state(), ConnectionState::Open);
  }

  #[tokio::test]
  async fn malformed_reply_surfaces_protocol_error() {
    let (ipc, mut peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    peer.next_command().await;
    peer.send(json!({"request_id": request.id(), "data": 1})).await;
    assert!(matches!(request.wait().await, Err(MpvError::Protocol(_))));
  }

  #[tokio::test]
  async fn cancel_after_write_wins_over_late_reply() {
    let (ipc, mut peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    let id = request.id();
    peer.next_command().await;
    wait_pending(&ipc, 1).await;

    request.cancel();
    assert!(request.wait().await.unwrap_err().is_cancelled());
    wait_pending(&ipc, 0).await;

    peer.reply(id, json!(true)).await;
    let next = ipc.start_request("get_property", vec![json!("mute")], false, None).await.unwrap();
    peer.next_command().await;
    peer.reply(next.id(), json!(false)).await;
    assert_eq!(next.wait().await.unwrap(), json!(false));
  }

  #[tokio::test]
  async fn caller_token_cancels_without_being_cancelled_back() {
    let (ipc, mut peer) = connect();
    let parent = CancellationToken::new();
    let request = ipc.start_request("seek", vec![json!(10)], false, Some(&parent)).await.unwrap();
    peer.next_command().await;

    request.cancellation().cancel();
    assert!(!parent.is_cancelled());
    assert!(request.wait().await.unwrap_err().is_cancelled());

    let request = ipc.start_request("seek", vec![json!(20)], false, Some(&parent)).await.unwrap();
    peer.next_command().await;
    parent.cancel();
    assert!(request.wait().await.unwrap_err().is_cancelled());
    wait_pending(&ipc, 0).await;
  }

  #[tokio::test]
  async fn already_cancelled_token_is_refused() {
    let (ipc, _peer) = connect();
    let token = CancellationToken::new();
    token.cancel();
    let result = ipc.start_request("quit", vec![], false, Some(&token)).await;
    assert!(matches!(result, Err(MpvError::Cancelled)));
  }

  #[tokio::test]
  async fn dropping_wait_future_cleans_up_entry() {
    let (ipc, mut peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    peer.next_command().await;
    wait_pending(&ipc, 1).await;

    let timed_out = tokio::time::timeout(Duration::from_millis(20), request.wait()).await;
    assert!(timed_out.is_err());
    wait_pending(&ipc, 0).await;
  }

  #[tokio::test]
  async fn close_drains_pending_requests_once() {
    let (ipc, mut peer) = connect();
    let mut requests = Vec::new();
    for i in 0..3 {
      requests.push(ipc.start_request("get_property", vec![json!(i)], false, None).await.unwrap());
      peer.next_command().await;
    }
    wait_pending(&ipc, 3).await;

    ipc.close().await.unwrap();
    assert_eq!(ipc.state(), ConnectionState::Closed);
    assert_eq!(ipc.pending_count(), 0);
    for request in requests {
      assert!(request.wait().await.unwrap_err().is_closed());
    }

    ipc.close().await.unwrap();
    assert!(matches!(
      ipc.start_request("quit", vec![], false, None).await,
      Err(MpvError::Closed)
    ));
  }

  #[tokio::test]
  async fn peer_hangup_closes_connection() {
    let (ipc, peer) = connect();
    let request = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    drop(peer);

    tokio::time::timeout(Duration::from_secs(5), ipc.closed())
      .await
      .expect("connection closes after hangup");
    assert_eq!(ipc.state(), ConnectionState::Closed);
    let err = request.wait().await.unwrap_err();
    assert!(err.is_closed() || matches!(err, MpvError::Transport(_)));
    ipc.close().await.unwrap();
  }

  #[tokio::test]
  async fn events_reach_subscribers_in_order() {
    let (ipc, mut peer) = connect();
    let (tx, rx) = async_channel::unbounded();
    ipc.events().subscribe(DispatchMode::Sync, move |event| {
      let _ = tx.try_send(event.event.clone());
    });

    peer.send(json!({"event": "start-file"})).await;
    peer.send(json!({"event": "file-loaded"})).await;
    assert_eq!(rx.recv().await.unwrap(), "start-file");
    assert_eq!(rx.recv().await.unwrap(), "file-loaded");
  }

  #[tokio::test]
  async fn blocking_subscriber_does_not_hold_up_replies() {
    let (ipc, mut peer) = connect();
    let (gate, blocked) = std::sync::mpsc::channel::<()>();
    let blocked = Mutex::new(blocked);
    let finished = Arc::new(AtomicBool::new(false));
    ipc.events().subscribe(DispatchMode::Sync, {
      let finished = finished.clone();
      move |_| {
        let _ = blocked.lock().recv_timeout(Duration::from_secs(2));
        finished.store(true, Ordering::SeqCst);
      }
    });

    for _ in 0..3 {
      peer.send(json!({"event": "audio-reconfig"})).await;
    }
    let request = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    peer.next_command().await;
    peer.reply(request.id(), json!(true)).await;
    assert_eq!(request.wait().await.unwrap(), json!(true));
    // The reply got through while the first callback was still parked.
    assert!(!finished.load(Ordering::SeqCst));

    drop(gate);
    ipc.close().await.unwrap();
  }

  /// Accepts nothing: every write fails.
  struct BrokenWriter;

  impl AsyncWrite for BrokenWriter {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
      Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
    }
  }

  /// Reads from the inner stream but reports its end as a reset.
  struct ResetOnEof<R>(R);

  impl<R: AsyncRead + Unpin> AsyncRead for ResetOnEof<R> {
    fn poll_read(
      mut self: Pin<&mut Self>,
      cx: &mut Context<'_>,
      buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
      let before = buf.filled().len();
      match Pin::new(&mut self.0).poll_read(cx, buf) {
        Poll::Ready(Ok(())) if buf.filled().len() == before => Poll::Ready(Err(io::Error::new(
          io::ErrorKind::ConnectionReset,
          "connection reset",
        ))),
        other => other,
      }
    }
  }

  #[tokio::test]
  async fn write_failure_fails_only_that_request() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (reader, _player) = tokio::io::duplex(1024);
    let ipc = MpvIpc::new(reader, BrokenWriter, 8, 8);

    for property in ["pause", "volume"] {
      match ipc.send_command("get_property", vec![json!(property)], None).await {
        Err(MpvError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("expected transport error, got {:?}", other),
      }
    }
    assert_eq!(ipc.pending_count(), 0);
    assert_eq!(ipc.state(), ConnectionState::Open);
    ipc.close().await.unwrap();
  }

  #[tokio::test]
  async fn read_failure_drains_callers_with_transport_error() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (reader, player_writer) = tokio::io::duplex(1024);
    let (writer, _player_reader) = tokio::io::duplex(64 * 1024);
    let ipc = MpvIpc::new(ResetOnEof(reader), writer, 8, 8);

    let first = ipc.start_request("get_property", vec![json!("pause")], false, None).await.unwrap();
    let second = ipc.start_request("get_property", vec![json!("mute")], false, None).await.unwrap();
    wait_pending(&ipc, 2).await;

    drop(player_writer);
    for request in [first, second] {
      match request.wait().await {
        Err(MpvError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("expected transport error, got {:?}", other),
      }
    }
    tokio::time::timeout(Duration::from_secs(5), ipc.closed())
      .await
      .expect("connection closes after read error");
  }
}
