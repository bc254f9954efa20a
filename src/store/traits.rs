//! Core types for the local durable store.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Logical collections kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  /// Cached/offline copies of fetched resources, keyed by logical resource key
  OfflineData,
  /// Pending mutations, keyed by queue item id
  SyncQueue,
}

impl Collection {
  /// Name used as the partition column in storage.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::OfflineData => "offlineData",
      Self::SyncQueue => "syncQueue",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A single stored value with its write timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
  pub key: String,
  pub payload: Value,
  /// When the record was last written
  pub stored_at: DateTime<Utc>,
}

impl CachedRecord {
  /// Whether the record is younger than `ttl`.
  pub fn is_fresh(&self, ttl: Duration) -> bool {
    // Clock skew can put stored_at in the future; count that as brand new
    let age = (Utc::now() - self.stored_at).to_std().unwrap_or_default();
    age < ttl
  }
}
