//! Online/offline state.
//!
//! The monitor is the only source of truth for whether the remote service
//! is reachable. Whatever observes the platform's network events calls
//! [`ConnectivityMonitor::set_online`]; interested tasks subscribe to
//! transitions.

use tokio::sync::watch;

/// Tracks whether the remote service is reachable.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  /// Create a new monitor in the given state.
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a connectivity event.
  ///
  /// Returns whether the state changed. Repeating the current state is a
  /// no-op and wakes no subscribers.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|state| {
      if *state == online {
        return false;
      }
      *state = online;
      true
    });

    if changed {
      if online {
        tracing::info!("connectivity restored, going online");
      } else {
        tracing::warn!("connectivity lost, going offline");
      }
    }
    changed
  }

  /// Receiver that is notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(true)
  }
}

#[cfg(test)]
#[path = "connectivity_tests.rs"]
mod tests;
