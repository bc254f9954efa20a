//! User-facing notifications.
//!
//! Producers call [`Notifier::notify`] and move on. [`NotificationCenter`]
//! fans each notification out to explicitly registered subscribers over
//! bounded channels; a subscriber that falls behind loses notifications, the
//! producer never waits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::id::timestamped_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Success,
  Error,
  Warning,
  Info,
}

impl Severity {
  /// How long a UI should keep the notification visible. `None` means until dismissed.
  pub fn display_duration(&self) -> Option<Duration> {
    match self {
      Self::Success | Self::Info => Some(Duration::from_millis(5000)),
      Self::Warning => Some(Duration::from_millis(7000)),
      Self::Error => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Notification {
  pub id: String,
  pub severity: Severity,
  pub message: String,
  pub duration: Option<Duration>,
}

impl Notification {
  pub fn new(severity: Severity, message: impl Into<String>) -> Self {
    Self {
      id: format!("notification-{}", timestamped_id()),
      severity,
      message: message.into(),
      duration: severity.display_duration(),
    }
  }
}

/// Sink for user-visible state changes. Fire-and-forget.
pub trait Notifier: Send + Sync {
  fn notify(&self, severity: Severity, message: &str);

  fn success(&self, message: &str) {
    self.notify(Severity::Success, message);
  }

  fn error(&self, message: &str) {
    self.notify(Severity::Error, message);
  }

  fn warning(&self, message: &str) {
    self.notify(Severity::Warning, message);
  }

  fn info(&self, message: &str) {
    self.notify(Severity::Info, message);
  }
}

pub type SubscriptionId = u64;

/// Observer registry delivering notifications to subscribers.
pub struct NotificationCenter {
  subscribers: Mutex<HashMap<SubscriptionId, mpsc::Sender<Notification>>>,
  next_id: AtomicU64,
  /// Per-subscriber channel capacity
  buffer: usize,
}

impl NotificationCenter {
  pub fn new(buffer: usize) -> Self {
    Self {
      subscribers: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(1),
      buffer: buffer.max(1),
    }
  }

  /// Register a subscriber.
  pub fn subscribe(&self) -> (SubscriptionId, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel(self.buffer);
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut subs) = self.subscribers.lock() {
      subs.insert(id, tx);
    }
    (id, rx)
  }

  /// Remove a subscriber. Returns whether it was registered.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self
      .subscribers
      .lock()
      .map(|mut subs| subs.remove(&id).is_some())
      .unwrap_or(false)
  }

  fn publish(&self, notification: Notification) {
    let Ok(mut subs) = self.subscribers.lock() else {
      return;
    };

    subs.retain(|id, tx| match tx.try_send(notification.clone()) {
      Ok(()) => true,
      Err(mpsc::error::TrySendError::Full(_)) => {
        warn!(subscriber = id, "notification dropped, subscriber is full");
        true
      }
      // Receiver went away without unsubscribing
      Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
  }
}

impl Default for NotificationCenter {
  fn default() -> Self {
    Self::new(32)
  }
}

impl Notifier for NotificationCenter {
  fn notify(&self, severity: Severity, message: &str) {
    match severity {
      Severity::Error => error!(notice = message, "notification"),
      Severity::Warning => warn!(notice = message, "notification"),
      Severity::Success | Severity::Info => info!(notice = message, "notification"),
    }
    self.publish(Notification::new(severity, message));
  }
}
