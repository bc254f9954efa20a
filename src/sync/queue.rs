//! Durable queue of mutations made while offline, and the replay loop that
//! drains it once the network is back.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::connectivity::ConnectivityState;
use crate::id::timestamped_id;
use crate::notify::Notifier;
use crate::remote::{RemoteApi, RemoteError};
use crate::store::{Collection, LocalStore};

/// Retries allowed per item after its first failed replay.
pub const MAX_RETRIES: u32 = 3;

const PERMANENT_FAILURE_MESSAGE: &str = "Failed to sync some changes. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
  Create,
  Update,
  Delete,
}

impl SyncAction {
  /// HTTP method used to replay the action.
  pub fn method(&self) -> Method {
    match self {
      Self::Create => Method::POST,
      Self::Update => Method::PUT,
      Self::Delete => Method::DELETE,
    }
  }
}

impl fmt::Display for SyncAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    };
    f.pad(name)
  }
}

/// A mutation waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
  pub id: String,
  pub action: SyncAction,
  pub endpoint: String,
  pub data: Value,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl SyncQueueItem {
  fn new(action: SyncAction, endpoint: &str, data: Value) -> Self {
    Self {
      id: timestamped_id(),
      action,
      endpoint: endpoint.to_string(),
      data,
      enqueued_at: Utc::now(),
      retry_count: 0,
    }
  }
}

/// How replay failures are classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
  /// Every failure consumes a retry, including 4xx rejections.
  #[default]
  Uniform,
  /// 4xx rejections are evicted on first failure; only transport errors and
  /// 5xx consume retries.
  FailFastOnRejection,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replayed successfully and removed
  pub replayed: usize,
  /// Failed, kept for a later pass
  pub requeued: usize,
  /// Failed for good and dropped
  pub evicted: usize,
}

/// Sync queue processor.
///
/// The store owns the queue; `pending` only mirrors the items waiting for the
/// next drain.
pub struct SyncQueue {
  store: Arc<dyn LocalStore>,
  remote: Arc<dyn RemoteApi>,
  notifier: Arc<dyn Notifier>,
  connectivity: ConnectivityState,
  pending: Mutex<Vec<SyncQueueItem>>,
  policy: RetryPolicy,
}

impl SyncQueue {
  pub fn new(
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    notifier: Arc<dyn Notifier>,
    connectivity: ConnectivityState,
  ) -> Self {
    Self {
      store,
      remote,
      notifier,
      connectivity,
      pending: Mutex::new(Vec::new()),
      policy: RetryPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Reload items persisted by an earlier process into the pending list.
  ///
  /// Items already pending are left alone. Returns how many were added.
  pub async fn restore(&self) -> Result<usize> {
    let records = self.store.list(Collection::SyncQueue)?;

    let mut restored: Vec<SyncQueueItem> = Vec::with_capacity(records.len());
    for record in records {
      match serde_json::from_value::<SyncQueueItem>(record.payload) {
        Ok(item) => restored.push(item),
        Err(e) => {
          warn!(key = %record.key, error = %e, "dropping unreadable queue item");
          self.store.delete(Collection::SyncQueue, &record.key)?;
        }
      }
    }
    restored.sort_by(|a, b| {
      a.enqueued_at
        .cmp(&b.enqueued_at)
        .then_with(|| a.id.cmp(&b.id))
    });

    let mut pending = self.pending.lock().await;
    let before = pending.len();
    for item in restored {
      if !pending.iter().any(|p| p.id == item.id) {
        pending.push(item);
      }
    }
    let added = pending.len() - before;
    if added > 0 {
      info!(count = added, "restored queued mutations");
    }
    Ok(added)
  }

  /// Record a mutation for replay. Drains right away when online.
  ///
  /// Refused when the store can't keep the item past this process.
  pub async fn enqueue(
    &self,
    action: SyncAction,
    endpoint: &str,
    data: Value,
  ) -> Result<SyncQueueItem> {
    if !self.store.is_durable() {
      return Err(eyre!(
        "Can't queue {} {}: offline storage is unavailable",
        action,
        endpoint
      ));
    }

    let item = SyncQueueItem::new(action, endpoint, data);
    self.persist(&item)?;
    self.pending.lock().await.push(item.clone());
    debug!(id = %item.id, %action, endpoint, "mutation queued");

    if self.connectivity.is_online() {
      self.drain().await;
    }

    Ok(item)
  }

  /// Replay every pending item once, in order.
  ///
  /// Items enqueued while this runs wait for the next pass, and so do items
  /// that fail here.
  pub async fn drain(&self) -> DrainReport {
    let mut report = DrainReport::default();
    if !self.connectivity.is_online() {
      return report;
    }

    let snapshot = std::mem::take(&mut *self.pending.lock().await);
    if snapshot.is_empty() {
      return report;
    }
    info!(count = snapshot.len(), "draining sync queue");

    for mut item in snapshot {
      match self.replay(&item).await {
        Ok(_) => {
          self.forget(&item);
          report.replayed += 1;
        }
        Err(e) if self.policy == RetryPolicy::FailFastOnRejection && e.is_rejection() => {
          warn!(id = %item.id, error = %e, "mutation rejected by server");
          self.evict(&item);
          report.evicted += 1;
        }
        Err(e) if item.retry_count < MAX_RETRIES => {
          item.retry_count += 1;
          debug!(id = %item.id, retry = item.retry_count, error = %e, "replay failed, will retry");
          if let Err(e) = self.persist(&item) {
            error!(
              id = %item.id,
              retry = item.retry_count,
              error = %e,
              "failed to persist retry count, stored and pending copies have diverged"
            );
          }
          self.pending.lock().await.push(item);
          report.requeued += 1;
        }
        Err(e) => {
          warn!(
            id = %item.id,
            action = %item.action,
            endpoint = %item.endpoint,
            error = %e,
            "giving up on mutation"
          );
          self.evict(&item);
          report.evicted += 1;
        }
      }
    }

    info!(
      replayed = report.replayed,
      requeued = report.requeued,
      evicted = report.evicted,
      "drain finished"
    );
    report
  }

  /// Items waiting for the next drain, in replay order.
  pub async fn pending(&self) -> Vec<SyncQueueItem> {
    self.pending.lock().await.clone()
  }

  async fn replay(&self, item: &SyncQueueItem) -> Result<Value, RemoteError> {
    let body = match item.action {
      SyncAction::Delete => None,
      SyncAction::Create | SyncAction::Update => Some(&item.data),
    };
    self
      .remote
      .send(item.action.method(), &item.endpoint, body)
      .await
  }

  fn persist(&self, item: &SyncQueueItem) -> Result<()> {
    let value =
      serde_json::to_value(item).map_err(|e| eyre!("Failed to serialize queue item: {}", e))?;
    self.store.put(Collection::SyncQueue, &item.id, &value)
  }

  fn forget(&self, item: &SyncQueueItem) {
    if let Err(e) = self.store.delete(Collection::SyncQueue, &item.id) {
      warn!(id = %item.id, error = %e, "failed to remove synced mutation");
    }
  }

  fn evict(&self, item: &SyncQueueItem) {
    self.forget(item);
    self.notifier.error(PERMANENT_FAILURE_MESSAGE);
  }
}
