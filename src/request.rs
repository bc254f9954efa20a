//! Request wrapper used by UI actions.
//!
//! Reads go cache-first through the store's `offlineData` collection and fall
//! back to the last known copy when the network is gone. Writes go straight to
//! the API while online and into the sync queue while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::notify::Notifier;
use crate::remote::RemoteApi;
use crate::store::{CachedRecord, Collection, LocalStore};
use crate::sync::{ConnectivityState, SyncAction, SyncQueue};

const QUEUED_MESSAGE: &str = "Changes will be saved when you're back online";
const MUTATION_FAILED_MESSAGE: &str = "An error occurred. Please try again.";
const FETCH_FAILED_MESSAGE: &str = "Error fetching data";
const NO_OFFLINE_STORAGE_MESSAGE: &str =
  "You are offline. Please try again when you have an internet connection.";
const UNAVAILABLE_OFFLINE_MESSAGE: &str = "This data is not available offline";

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, younger than the requested TTL
  CacheFresh,
  /// Offline mode - network unavailable, serving the last known copy
  Offline,
}

/// Data plus metadata about where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Result of a read.
#[derive(Debug, Clone)]
pub enum ReadOutcome<T> {
  Available(CacheResult<T>),
  /// Offline and nothing cached under the key
  Unavailable,
}

/// Result of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
  /// Sent to the API; carries the response body
  Completed(Value),
  /// Offline: recorded for replay. `cached` is the last known copy of the
  /// resource, if any.
  Queued {
    item_id: String,
    cached: Option<Value>,
  },
}

/// Front door for reads and writes coming from the UI.
#[derive(Clone)]
pub struct RequestWrapper {
  store: Arc<dyn LocalStore>,
  remote: Arc<dyn RemoteApi>,
  queue: Arc<SyncQueue>,
  connectivity: ConnectivityState,
  notifier: Arc<dyn Notifier>,
}

impl RequestWrapper {
  pub fn new(
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    queue: Arc<SyncQueue>,
    connectivity: ConnectivityState,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      store,
      remote,
      queue,
      connectivity,
      notifier,
    }
  }

  /// Perform a mutation now, or queue it when offline.
  pub async fn execute_mutation(
    &self,
    action: SyncAction,
    endpoint: &str,
    data: Value,
  ) -> Result<MutationOutcome> {
    if self.connectivity.is_offline() {
      // Nothing to queue into: the change would be gone with the process
      if !self.store.is_durable() {
        self.notifier.error(NO_OFFLINE_STORAGE_MESSAGE);
        return Err(eyre!(
          "{} {} not sent: offline and offline storage is unavailable",
          action,
          endpoint
        ));
      }

      let item = self.queue.enqueue(action, endpoint, data).await?;
      self.notifier.warning(QUEUED_MESSAGE);

      let cached = self
        .store
        .get(Collection::OfflineData, endpoint)?
        .map(|record| record.payload);
      return Ok(MutationOutcome::Queued {
        item_id: item.id,
        cached,
      });
    }

    let body = match action {
      SyncAction::Delete => None,
      SyncAction::Create | SyncAction::Update => Some(&data),
    };

    match self.remote.send(action.method(), endpoint, body).await {
      Ok(response) => {
        let stored = match action {
          SyncAction::Delete => self.store.delete(Collection::OfflineData, endpoint),
          SyncAction::Create | SyncAction::Update => {
            self.store.put(Collection::OfflineData, endpoint, &response)
          }
        };
        if let Err(e) = stored {
          warn!(endpoint, error = %e, "failed to update offline copy");
        }
        Ok(MutationOutcome::Completed(response))
      }
      Err(e) => {
        self.notifier.error(MUTATION_FAILED_MESSAGE);
        Err(eyre!("{} {} failed: {}", action, endpoint, e))
      }
    }
  }

  /// Cache-first read.
  ///
  /// 1. Cached and younger than `ttl` - return it without fetching
  /// 2. Otherwise fetch, store and return
  /// 3. Fetch failed while offline - return the stale copy, or `Unavailable`
  /// 4. Fetch failed while online - notify and propagate
  pub async fn execute_read<T, F, Fut>(
    &self,
    cache_key: &str,
    fetcher: F,
    ttl: Duration,
  ) -> Result<ReadOutcome<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let record = self.store.get(Collection::OfflineData, cache_key)?;
    let cached = record.as_ref().and_then(|record| {
      decode::<T>(cache_key, record).map(|data| (data, record.stored_at, record.is_fresh(ttl)))
    });

    let cached = match cached {
      Some((data, stored_at, true)) => {
        debug!(cache_key, "serving fresh cache");
        return Ok(ReadOutcome::Available(CacheResult::from_cache(data, stored_at)));
      }
      other => other.map(|(data, stored_at, _)| (data, stored_at)),
    };

    match fetcher().await {
      Ok(data) => {
        match serde_json::to_value(&data) {
          Ok(value) => {
            if let Err(e) = self.store.put(Collection::OfflineData, cache_key, &value) {
              warn!(cache_key, error = %e, "failed to cache response");
            }
          }
          Err(e) => warn!(cache_key, error = %e, "response is not cacheable"),
        }
        Ok(ReadOutcome::Available(CacheResult::from_network(data)))
      }
      Err(e) if self.connectivity.is_offline() => {
        debug!(cache_key, error = %e, "fetch failed while offline");
        Ok(match cached {
          Some((data, stored_at)) => ReadOutcome::Available(CacheResult::offline(data, stored_at)),
          None => {
            self.notifier.info(UNAVAILABLE_OFFLINE_MESSAGE);
            ReadOutcome::Unavailable
          }
        })
      }
      Err(e) => {
        self.notifier.error(FETCH_FAILED_MESSAGE);
        Err(e)
      }
    }
  }

  /// GET `endpoint` through the cache, keyed by the endpoint itself.
  pub async fn get(&self, endpoint: &str, ttl: Duration) -> Result<ReadOutcome<Value>> {
    let remote = Arc::clone(&self.remote);
    let path = endpoint.to_string();
    self
      .execute_read(
        endpoint,
        move || async move { remote.fetch(&path).await.map_err(|e| eyre!(e)) },
        ttl,
      )
      .await
  }
}

fn decode<T: DeserializeOwned>(cache_key: &str, record: &CachedRecord) -> Option<T> {
  match T::deserialize(&record.payload) {
    Ok(data) => Some(data),
    Err(e) => {
      warn!(cache_key, error = %e, "ignoring unreadable cache entry");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::Severity;
  use crate::store::NoopStore;
  use crate::sync::NetworkStatus;
  use crate::testing::{center, memory_store, received, FakeRemote};
  use reqwest::Method;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Harness {
    wrapper: RequestWrapper,
    store: Arc<dyn LocalStore>,
    remote: Arc<FakeRemote>,
    queue: Arc<SyncQueue>,
    connectivity: ConnectivityState,
    notes: tokio::sync::mpsc::Receiver<crate::notify::Notification>,
  }

  fn harness(status: NetworkStatus, remote: FakeRemote) -> Harness {
    harness_with_store(status, remote, memory_store())
  }

  fn harness_with_store(
    status: NetworkStatus,
    remote: FakeRemote,
    store: Arc<dyn LocalStore>,
  ) -> Harness {
    let remote = Arc::new(remote);
    let notifier = center();
    let (_id, notes) = notifier.subscribe();
    let connectivity = ConnectivityState::new(status);
    let queue = Arc::new(SyncQueue::new(
      store.clone(),
      remote.clone(),
      notifier.clone(),
      connectivity.clone(),
    ));
    let wrapper = RequestWrapper::new(
      store.clone(),
      remote.clone(),
      queue.clone(),
      connectivity.clone(),
      notifier,
    );
    Harness {
      wrapper,
      store,
      remote,
      queue,
      connectivity,
      notes,
    }
  }

  fn counting_fetch(
    counter: &Arc<AtomicUsize>,
    reply: Result<Value, &'static str>,
  ) -> impl FnOnce() -> std::future::Ready<Result<Value>> {
    let counter = Arc::clone(counter);
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(reply.map_err(|e| eyre!(e)))
    }
  }

  #[tokio::test]
  async fn test_second_read_within_ttl_hits_cache() {
    let h = harness(NetworkStatus::Online, FakeRemote::ok());
    let fetches = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(5000);
    let forecast = json!({"temp": 21, "lat": 10, "lon": 20});

    let first = h
      .wrapper
      .execute_read("weather_10_20", counting_fetch(&fetches, Ok(forecast.clone())), ttl)
      .await
      .unwrap();
    let second = h
      .wrapper
      .execute_read("weather_10_20", counting_fetch(&fetches, Ok(json!("other"))), ttl)
      .await
      .unwrap();

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let ReadOutcome::Available(first) = first else {
      panic!("expected data");
    };
    assert_eq!(first.source, CacheSource::Network);
    let ReadOutcome::Available(second) = second else {
      panic!("expected data");
    };
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, forecast);
    assert!(second.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_expired_entry_is_refetched() {
    let h = harness(NetworkStatus::Online, FakeRemote::ok());
    let fetches = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
      h.wrapper
        .execute_read("places", counting_fetch(&fetches, Ok(json!([1, 2]))), Duration::ZERO)
        .await
        .unwrap();
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_offline_read_without_cache_is_unavailable() {
    let mut h = harness(NetworkStatus::Offline, FakeRemote::ok());
    let fetches = Arc::new(AtomicUsize::new(0));

    let outcome = h
      .wrapper
      .execute_read::<Value, _, _>(
        "trip_42",
        counting_fetch(&fetches, Err("network unreachable")),
        Duration::from_secs(60),
      )
      .await
      .unwrap();

    assert!(matches!(outcome, ReadOutcome::Unavailable));
    let notes = received(&mut h.notes);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Info);
    assert_eq!(notes[0].message, UNAVAILABLE_OFFLINE_MESSAGE);
  }

  #[tokio::test]
  async fn test_offline_read_falls_back_to_stale_copy() {
    let h = harness(NetworkStatus::Offline, FakeRemote::ok());
    h.store
      .put(Collection::OfflineData, "trip_42", &json!({"title": "Lisbon"}))
      .unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));

    let outcome = h
      .wrapper
      .execute_read::<Value, _, _>(
        "trip_42",
        counting_fetch(&fetches, Err("network unreachable")),
        Duration::ZERO,
      )
      .await
      .unwrap();

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let ReadOutcome::Available(result) = outcome else {
      panic!("expected stale copy");
    };
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, json!({"title": "Lisbon"}));
  }

  #[tokio::test]
  async fn test_online_fetch_failure_is_propagated() {
    let mut h = harness(NetworkStatus::Online, FakeRemote::ok());
    let fetches = Arc::new(AtomicUsize::new(0));

    let result = h
      .wrapper
      .execute_read::<Value, _, _>(
        "trip_42",
        counting_fetch(&fetches, Err("boom")),
        Duration::from_secs(60),
      )
      .await;

    assert!(result.is_err());
    let notes = received(&mut h.notes);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Error);
  }

  #[tokio::test]
  async fn test_typed_reads_round_trip_through_cache() {
    #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
    struct Forecast {
      temp: i32,
    }

    let h = harness(NetworkStatus::Online, FakeRemote::ok());
    let ttl = Duration::from_secs(60);
    h.wrapper
      .execute_read("forecast", || async { Ok(Forecast { temp: 3 }) }, ttl)
      .await
      .unwrap();

    let outcome = h
      .wrapper
      .execute_read("forecast", || async { Ok(Forecast { temp: 99 }) }, ttl)
      .await
      .unwrap();
    let ReadOutcome::Available(result) = outcome else {
      panic!("expected data");
    };
    assert_eq!(result.data, Forecast { temp: 3 });
  }

  #[tokio::test]
  async fn test_get_fetches_endpoint() {
    let h = harness(
      NetworkStatus::Online,
      FakeRemote::ok().replying(json!([{"id": 1}])),
    );

    let outcome = h.wrapper.get("/trips", Duration::from_secs(60)).await.unwrap();

    assert!(matches!(outcome, ReadOutcome::Available(_)));
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::GET);
    assert_eq!(calls[0].endpoint, "/trips");
  }

  #[tokio::test]
  async fn test_online_mutation_goes_straight_to_remote() {
    let h = harness(
      NetworkStatus::Online,
      FakeRemote::ok().replying(json!({"id": 1, "title": "Paris"})),
    );

    let outcome = h
      .wrapper
      .execute_mutation(SyncAction::Create, "/trips", json!({"title": "Paris"}))
      .await
      .unwrap();

    assert_eq!(
      outcome,
      MutationOutcome::Completed(json!({"id": 1, "title": "Paris"}))
    );
    assert!(h.queue.pending().await.is_empty());
    assert!(h.store.list(Collection::SyncQueue).unwrap().is_empty());
    let cached = h.store.get(Collection::OfflineData, "/trips").unwrap().unwrap();
    assert_eq!(cached.payload, json!({"id": 1, "title": "Paris"}));
  }

  #[tokio::test]
  async fn test_online_mutation_failure_is_propagated() {
    let mut h = harness(NetworkStatus::Online, FakeRemote::failing(500));

    let result = h
      .wrapper
      .execute_mutation(SyncAction::Update, "/trips/1", json!({"title": "X"}))
      .await;

    assert!(result.is_err());
    assert!(h.queue.pending().await.is_empty());
    assert_eq!(received(&mut h.notes)[0].severity, Severity::Error);
  }

  #[tokio::test]
  async fn test_online_delete_drops_offline_copy() {
    let h = harness(NetworkStatus::Online, FakeRemote::ok().replying(Value::Null));
    h.store
      .put(Collection::OfflineData, "/trips/1", &json!({"title": "X"}))
      .unwrap();

    h.wrapper
      .execute_mutation(SyncAction::Delete, "/trips/1", Value::Null)
      .await
      .unwrap();

    assert!(h.store.get(Collection::OfflineData, "/trips/1").unwrap().is_none());
    assert_eq!(h.remote.calls()[0].body, None);
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued_and_replayed() {
    let mut h = harness(NetworkStatus::Offline, FakeRemote::ok());
    h.store
      .put(Collection::OfflineData, "/trips/1", &json!({"title": "Old"}))
      .unwrap();

    let outcome = h
      .wrapper
      .execute_mutation(SyncAction::Update, "/trips/1", json!({"title": "New"}))
      .await
      .unwrap();

    let MutationOutcome::Queued { item_id, cached } = outcome else {
      panic!("expected queued mutation");
    };
    assert_eq!(cached, Some(json!({"title": "Old"})));
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.queue.pending().await[0].id, item_id);

    let notes = received(&mut h.notes);
    assert_eq!(notes[0].severity, Severity::Warning);
    assert_eq!(notes[0].message, QUEUED_MESSAGE);

    h.connectivity.set(NetworkStatus::Online);
    h.queue.drain().await;
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::PUT);
    assert_eq!(calls[0].body, Some(json!({"title": "New"})));
  }

  #[tokio::test]
  async fn test_offline_mutation_without_cache_reports_pending() {
    let h = harness(NetworkStatus::Offline, FakeRemote::ok());

    let outcome = h
      .wrapper
      .execute_mutation(SyncAction::Create, "/trips", json!({"title": "Paris"}))
      .await
      .unwrap();

    assert!(matches!(outcome, MutationOutcome::Queued { cached: None, .. }));
  }

  #[tokio::test]
  async fn test_offline_mutation_without_durable_storage_is_refused() {
    let mut h = harness_with_store(NetworkStatus::Offline, FakeRemote::ok(), Arc::new(NoopStore));

    let result = h
      .wrapper
      .execute_mutation(SyncAction::Create, "/trips", json!({"title": "Paris"}))
      .await;

    assert!(result.is_err());
    assert!(h.queue.pending().await.is_empty());
    assert!(h.remote.calls().is_empty());
    let notes = received(&mut h.notes);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Error);
    assert_eq!(notes[0].message, NO_OFFLINE_STORAGE_MESSAGE);
  }
}
