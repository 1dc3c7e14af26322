//! Fan-out of MPV events to registered subscribers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::protocol::MpvEvent;

/// How a subscriber's callback is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
  /// Runs on the dispatcher before the next event goes out to anyone.
  Sync,
  /// Runs on its own task; never holds up other subscribers.
  Concurrent,
}

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = dyn Fn(&MpvEvent) + Send + Sync;

struct Subscriber {
  id: SubscriptionId,
  mode: DispatchMode,
  active: AtomicBool,
  callback: Box<Callback>,
}

impl Subscriber {
  fn invoke(&self, event: &MpvEvent) {
    if !self.active.load(Ordering::Acquire) {
      return;
    }
    if catch_unwind(AssertUnwindSafe(|| (self.callback)(event))).is_err() {
      log::error!(
        "MPV event subscriber {:?} panicked handling {}",
        self.id,
        event.event
      );
    }
  }
}

type SubscriberList = Mutex<Vec<Arc<Subscriber>>>;

/// Ordered set of subscribers plus the buffered channel the reader feeds.
pub struct EventHub {
  subscribers: Arc<SubscriberList>,
  next_id: AtomicU64,
  event_tx: Sender<MpvEvent>,
  event_rx: Receiver<MpvEvent>,
}

impl EventHub {
  /// `buffer` is how many decoded events may wait for the dispatcher.
  pub(crate) fn new(buffer: usize) -> Self {
    let (event_tx, event_rx) = async_channel::bounded(buffer.max(1));
    Self {
      subscribers: Arc::new(Mutex::new(Vec::new())),
      next_id: AtomicU64::new(1),
      event_tx,
      event_rx,
    }
  }

  pub fn subscribe<F>(&self, mode: DispatchMode, callback: F) -> SubscriptionId
  where
    F: Fn(&MpvEvent) + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.subscribers.lock().push(Arc::new(Subscriber {
      id,
      mode,
      active: AtomicBool::new(true),
      callback: Box::new(callback),
    }));
    log::debug!("MPV event subscriber {:?} added ({:?})", id, mode);
    id
  }

  /// Remove a subscriber. Returns false if it was already gone.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut subscribers = self.subscribers.lock();
    match subscribers.iter().position(|s| s.id == id) {
      Some(index) => {
        let removed = subscribers.remove(index);
        removed.active.store(false, Ordering::Release);
        log::debug!("MPV event subscriber {:?} removed", id);
        true
      }
      None => false,
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscribers.lock().len()
  }

  /// Hand an event over without waiting. Returns false if it was dropped.
  pub(crate) fn offer(&self, event: MpvEvent) -> bool {
    match self.event_tx.try_send(event) {
      Ok(()) => true,
      Err(TrySendError::Full(event)) => {
        log::warn!("MPV event buffer full, dropping {} event", event.event);
        false
      }
      Err(TrySendError::Closed(event)) => {
        log::debug!("MPV event hub closed, dropping {} event", event.event);
        false
      }
    }
  }

  /// Stop accepting events. Buffered events are still dispatched.
  pub(crate) fn close(&self) {
    self.event_tx.close();
  }

  fn dispatcher(&self) -> Dispatcher {
    Dispatcher {
      subscribers: self.subscribers.clone(),
      runtime: Handle::current(),
    }
  }

  /// Start the dispatcher on the blocking pool so callbacks never stall the
  /// reader. It ends once the hub is closed (or dropped) and the buffer is empty.
  ///
  /// Must be called from within a tokio runtime.
  pub(crate) fn start(&self) -> JoinHandle<()> {
    let dispatcher = self.dispatcher();
    let event_rx = self.event_rx.clone();
    tokio::task::spawn_blocking(move || {
      log::info!("MPV event dispatcher started");
      while let Ok(event) = event_rx.recv_blocking() {
        dispatcher.deliver(event);
      }
      log::info!("MPV event dispatcher stopped");
    })
  }
}

/// Runs callbacks for the dispatcher thread. Holds no sender, so it never keeps
/// the event channel open by itself.
struct Dispatcher {
  subscribers: Arc<SubscriberList>,
  runtime: Handle,
}

impl Dispatcher {
  /// Deliver one event to every subscriber registered right now.
  fn deliver(&self, event: MpvEvent) {
    let snapshot: Vec<Arc<Subscriber>> = self.subscribers.lock().clone();
    if snapshot.is_empty() {
      return;
    }

    let event = Arc::new(event);
    for subscriber in snapshot {
      match subscriber.mode {
        DispatchMode::Sync => subscriber.invoke(&event),
        DispatchMode::Concurrent => {
          let event = event.clone();
          self
            .runtime
            .spawn_blocking(move || subscriber.invoke(&event));
        }
      }
    }
  }
}
