//! Online/offline state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::queue::SyncQueue;
use crate::event::{ConnectivitySignal, EventHandler};
use crate::notify::Notifier;

const OFFLINE_MESSAGE: &str = "You are offline. Changes will be saved locally.";
const ONLINE_MESSAGE: &str = "Back online! Syncing data...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
  Online,
  Offline,
}

impl From<ConnectivitySignal> for NetworkStatus {
  fn from(signal: ConnectivitySignal) -> Self {
    match signal {
      ConnectivitySignal::Online => Self::Online,
      ConnectivitySignal::Offline => Self::Offline,
    }
  }
}

/// Shared, cheaply cloned view of the current connectivity.
///
/// Only the monitor moves it in production; readers just ask.
#[derive(Debug, Clone)]
pub struct ConnectivityState {
  online: Arc<AtomicBool>,
}

impl ConnectivityState {
  pub fn new(initial: NetworkStatus) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(initial == NetworkStatus::Online)),
    }
  }

  pub fn status(&self) -> NetworkStatus {
    if self.is_online() {
      NetworkStatus::Online
    } else {
      NetworkStatus::Offline
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  pub fn is_offline(&self) -> bool {
    !self.is_online()
  }

  /// Set the status, returning the previous one.
  pub(crate) fn set(&self, status: NetworkStatus) -> NetworkStatus {
    let was_online = self
      .online
      .swap(status == NetworkStatus::Online, Ordering::SeqCst);
    if was_online {
      NetworkStatus::Online
    } else {
      NetworkStatus::Offline
    }
  }
}

/// Reacts to platform connectivity edges.
pub struct ConnectivityMonitor {
  state: ConnectivityState,
  queue: Arc<SyncQueue>,
  notifier: Arc<dyn Notifier>,
}

impl ConnectivityMonitor {
  pub fn new(state: ConnectivityState, queue: Arc<SyncQueue>, notifier: Arc<dyn Notifier>) -> Self {
    Self {
      state,
      queue,
      notifier,
    }
  }

  #[allow(dead_code)]
  pub fn is_offline(&self) -> bool {
    self.state.is_offline()
  }

  /// Apply one platform signal. Repeats of the current state are ignored.
  pub async fn handle_signal(&self, signal: ConnectivitySignal) {
    let next = NetworkStatus::from(signal);
    let previous = self.state.set(next);
    if previous == next {
      debug!(?next, "connectivity unchanged");
      return;
    }

    match next {
      NetworkStatus::Offline => {
        info!("went offline");
        self.notifier.warning(OFFLINE_MESSAGE);
      }
      NetworkStatus::Online => {
        info!("back online");
        self.notifier.success(ONLINE_MESSAGE);
        self.queue.drain().await;
      }
    }
  }

  /// Consume signals from `events` on a background task until shut down or
  /// the source closes.
  pub fn spawn(self: Arc<Self>, mut events: EventHandler) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          signal = events.next() => match signal {
            Some(signal) => self.handle_signal(signal).await,
            None => break,
          },
        }
      }
      debug!("connectivity monitor stopped");
    });

    MonitorHandle { shutdown_tx, task }
  }
}

/// Handle to a running monitor.
pub struct MonitorHandle {
  shutdown_tx: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

impl MonitorHandle {
  /// Stop listening for signals and wait for the monitor to finish.
  #[allow(dead_code)]
  pub async fn shutdown(self) {
    let _ = self.shutdown_tx.send(());
    let _ = self.task.await;
  }

  /// Wait until the signal source closes.
  pub async fn finished(self) {
    let _ = self.task.await;
  }
}
