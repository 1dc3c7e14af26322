//! Bookkeeping for requests that have been handed to the writer and are still
//! waiting for MPV to answer.
//!
//! A [`PendingRequest`] is resolved at most once: resolving consumes it. Whoever
//! removes an entry from the [`PendingTable`] owns its resolution, which is how a
//! reply racing a cancellation (or the close drain) ends with exactly one
//! outcome.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::protocol::{MpvCommand, Outcome};

/// A command together with the channel its outcome is delivered on.
pub(crate) struct PendingRequest {
  command: MpvCommand,
  outcome_tx: oneshot::Sender<Outcome>,
  cancel: CancellationToken,
  /// Fires the request's `settled` token once the entry is resolved or dropped.
  _settled: DropGuard,
}

impl PendingRequest {
  pub(crate) fn new(
    command: MpvCommand,
    outcome_tx: oneshot::Sender<Outcome>,
    cancel: CancellationToken,
    settled: CancellationToken,
  ) -> Self {
    Self {
      command,
      outcome_tx,
      cancel,
      _settled: settled.drop_guard(),
    }
  }

  pub(crate) fn id(&self) -> i64 {
    self.command.request_id
  }

  pub(crate) fn command(&self) -> &MpvCommand {
    &self.command
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub(crate) fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Deliver the outcome. A caller that stopped listening is not an error.
  pub(crate) fn resolve(self, outcome: Outcome) {
    if self.outcome_tx.send(outcome).is_err() {
      log::debug!(
        "MPV request {} resolved after its caller stopped waiting",
        self.command.request_id
      );
    }
  }
}

/// Request id → waiting request.
#[derive(Default)]
pub(crate) struct PendingTable {
  entries: Mutex<HashMap<i64, PendingRequest>>,
}

impl PendingTable {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Register a request. Hands the request back if its id is already taken.
  pub(crate) fn insert(&self, request: PendingRequest) -> Result<(), PendingRequest> {
    let mut entries = self.entries.lock();
    match entries.entry(request.id()) {
      Entry::Occupied(_) => Err(request),
      Entry::Vacant(slot) => {
        slot.insert(request);
        Ok(())
      }
    }
  }

  pub(crate) fn remove(&self, id: i64) -> Option<PendingRequest> {
    self.entries.lock().remove(&id)
  }

  /// Remove every entry and resolve each with `reason(entry)`.
  /// Returns how many entries were resolved.
  pub(crate) fn drain_with<F>(&self, mut reason: F) -> usize
  where
    F: FnMut(&PendingRequest) -> Outcome,
  {
    let drained: Vec<PendingRequest> = {
      let mut entries = self.entries.lock();
      entries.drain().map(|(_, request)| request).collect()
    };

    let count = drained.len();
    for request in drained {
      let outcome = reason(&request);
      request.resolve(outcome);
    }
    count
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.lock().len()
  }
}
