//! Test doubles shared by module tests.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::notify::{Notification, NotificationCenter};
use crate::remote::{RemoteApi, RemoteError};
use crate::store::SqliteStore;

/// A request the fake remote received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
  pub method: Method,
  pub endpoint: String,
  pub body: Option<Value>,
}

/// Remote that records every call and answers from a script.
///
/// Scripted responses are consumed in order; once the script runs out every
/// call gets the fallback.
pub struct FakeRemote {
  calls: Mutex<Vec<RecordedCall>>,
  script: Mutex<VecDeque<Option<u16>>>,
  fallback: Option<u16>,
  reply: Value,
}

impl FakeRemote {
  /// Every call succeeds with `{"ok": true}`.
  pub fn ok() -> Self {
    Self::with_fallback(None)
  }

  /// Every call fails with `status`.
  pub fn failing(status: u16) -> Self {
    Self::with_fallback(Some(status))
  }

  fn with_fallback(fallback: Option<u16>) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      script: Mutex::new(VecDeque::new()),
      fallback,
      reply: serde_json::json!({"ok": true}),
    }
  }

  pub fn replying(mut self, reply: Value) -> Self {
    self.reply = reply;
    self
  }

  /// Queue one scripted outcome: `None` succeeds, `Some(status)` fails.
  pub fn then(self, outcome: Option<u16>) -> Self {
    self.script.lock().unwrap().push_back(outcome);
    self
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteApi for FakeRemote {
  async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, RemoteError> {
    self.calls.lock().unwrap().push(RecordedCall {
      method: method.clone(),
      endpoint: endpoint.to_string(),
      body: body.cloned(),
    });

    let outcome = self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(self.fallback);

    match outcome {
      None => Ok(self.reply.clone()),
      Some(status) => Err(RemoteError::Status {
        method,
        endpoint: endpoint.to_string(),
        status: StatusCode::from_u16(status).unwrap(),
      }),
    }
  }
}

pub fn memory_store() -> Arc<SqliteStore> {
  Arc::new(SqliteStore::open_in_memory().unwrap())
}

/// Drain everything a subscriber has received so far.
pub fn received(rx: &mut tokio::sync::mpsc::Receiver<Notification>) -> Vec<Notification> {
  let mut out = Vec::new();
  while let Ok(n) = rx.try_recv() {
    out.push(n);
  }
  out
}

pub fn center() -> Arc<NotificationCenter> {
  Arc::new(NotificationCenter::new(64))
}
