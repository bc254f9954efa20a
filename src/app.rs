//! Composition root: wires the store, remote, queue, monitor and wrapper
//! together and runs one CLI command against them.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::event::EventHandler;
use crate::notify::{Notification, NotificationCenter, Severity, SubscriptionId};
use crate::remote::HttpRemote;
use crate::request::{CacheSource, MutationOutcome, ReadOutcome, RequestWrapper};
use crate::store::open_or_degrade;
use crate::sync::{ConnectivityMonitor, ConnectivityState, NetworkStatus, SyncAction, SyncQueue};

/// What the user asked for
#[derive(Debug, Clone)]
pub enum Command {
  Mutate {
    action: SyncAction,
    endpoint: String,
    data: Value,
  },
  Get {
    endpoint: String,
    ttl: Option<Duration>,
  },
  Sync,
  Queue,
  Watch,
}

pub struct App {
  config: Config,
  notifications: Arc<NotificationCenter>,
  subscription: SubscriptionId,
  notification_rx: mpsc::Receiver<Notification>,
  connectivity: ConnectivityState,
  queue: Arc<SyncQueue>,
  wrapper: RequestWrapper,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let notifications = Arc::new(NotificationCenter::new(config.notifications.buffer));
    let (subscription, notification_rx) = notifications.subscribe();

    let store = open_or_degrade(config.storage.path.as_deref(), notifications.as_ref());
    let remote = Arc::new(HttpRemote::new(&config)?);

    let initial = if config.start_offline {
      NetworkStatus::Offline
    } else {
      NetworkStatus::Online
    };
    let connectivity = ConnectivityState::new(initial);

    let queue = Arc::new(
      SyncQueue::new(
        store.clone(),
        remote.clone(),
        notifications.clone(),
        connectivity.clone(),
      )
      .with_policy(config.retry_policy()),
    );
    queue.restore().await?;

    let wrapper = RequestWrapper::new(
      store,
      remote,
      queue.clone(),
      connectivity.clone(),
      notifications.clone(),
    );

    Ok(Self {
      config,
      notifications,
      subscription,
      notification_rx,
      connectivity,
      queue,
      wrapper,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    info!(?command, status = ?self.connectivity.status(), "running command");

    let result = match command {
      Command::Mutate {
        action,
        endpoint,
        data,
      } => self.mutate(action, &endpoint, data).await,
      Command::Get { endpoint, ttl } => self.get(&endpoint, ttl).await,
      Command::Sync => self.sync().await,
      Command::Queue => self.list_queue().await,
      Command::Watch => self.watch().await,
    };

    self.flush_notifications();
    result
  }

  async fn mutate(&self, action: SyncAction, endpoint: &str, data: Value) -> Result<()> {
    match self.wrapper.execute_mutation(action, endpoint, data).await? {
      MutationOutcome::Completed(body) => print_json(&body),
      MutationOutcome::Queued { item_id, cached } => {
        println!("queued {} (pending sync)", item_id);
        if let Some(cached) = cached {
          print_json(&cached)?;
        }
        Ok(())
      }
    }
  }

  async fn get(&self, endpoint: &str, ttl: Option<Duration>) -> Result<()> {
    let ttl = ttl.unwrap_or_else(|| self.config.read_ttl());
    match self.wrapper.get(endpoint, ttl).await? {
      ReadOutcome::Available(result) => {
        if result.source != CacheSource::Network {
          let cached_at = result
            .cached_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
          eprintln!("({:?}, cached at {})", result.source, cached_at);
        }
        print_json(&result.data)
      }
      ReadOutcome::Unavailable => Err(eyre!(
        "{} is unavailable: offline and not cached",
        endpoint
      )),
    }
  }

  async fn sync(&self) -> Result<()> {
    if self.connectivity.is_offline() {
      return Err(eyre!("Can't sync while offline"));
    }
    let report = self.queue.drain().await;
    println!(
      "replayed {}, requeued {}, evicted {}",
      report.replayed, report.requeued, report.evicted
    );
    Ok(())
  }

  async fn list_queue(&self) -> Result<()> {
    let pending = self.queue.pending().await;
    if pending.is_empty() {
      println!("sync queue is empty");
    }
    for item in pending {
      println!(
        "{}  {:<6}  {}  retries={}  queued={}",
        item.id,
        item.action,
        item.endpoint,
        item.retry_count,
        item.enqueued_at.to_rfc3339()
      );
    }
    Ok(())
  }

  /// Follow connectivity signals from stdin until it closes.
  async fn watch(&mut self) -> Result<()> {
    eprintln!("reading connectivity signals (online/offline) from stdin");

    let monitor = Arc::new(ConnectivityMonitor::new(
      self.connectivity.clone(),
      self.queue.clone(),
      self.notifications.clone(),
    ));
    let mut handle = Box::pin(monitor.spawn(EventHandler::stdin()).finished());

    loop {
      tokio::select! {
        _ = &mut handle => break,
        Some(notification) = self.notification_rx.recv() => print_notification(&notification),
      }
    }

    Ok(())
  }

  fn flush_notifications(&mut self) {
    while let Ok(notification) = self.notification_rx.try_recv() {
      print_notification(&notification);
    }
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.notifications.unsubscribe(self.subscription);
  }
}

fn print_json(value: &Value) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format response: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_notification(notification: &Notification) {
  let label = match notification.severity {
    Severity::Success => "ok",
    Severity::Error => "error",
    Severity::Warning => "warning",
    Severity::Info => "info",
  };
  debug!(id = %notification.id, duration = ?notification.duration, "showing notification");
  match notification.duration {
    Some(duration) => eprintln!(
      "[{}] {} ({}s)",
      label,
      notification.message,
      duration.as_secs()
    ),
    None => eprintln!("[{}] {}", label, notification.message),
  }
}
