use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

/// Platform connectivity edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
  Online,
  Offline,
}

impl FromStr for ConnectivitySignal {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "online" | "up" => Ok(Self::Online),
      "offline" | "down" => Ok(Self::Offline),
      other => Err(format!("unknown connectivity signal '{}'", other)),
    }
  }
}

/// Event handler that produces connectivity signals from a platform source
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<ConnectivitySignal>,
}

impl EventHandler {
  /// Handler fed by hand through the returned sender
  pub fn channel() -> (Self, mpsc::UnboundedSender<ConnectivitySignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { rx }, tx)
  }

  /// Handler reading one signal per line (`online` / `offline`) from `reader`.
  /// Unrecognized lines are logged and skipped.
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (handler, tx) = Self::channel();

    // Spawn line reader
    tokio::spawn(async move {
      let mut lines = reader.lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
          continue;
        }
        match line.parse::<ConnectivitySignal>() {
          Ok(signal) => {
            if tx.send(signal).is_err() {
              break;
            }
          }
          Err(e) => warn!("{}", e),
        }
      }
    });

    handler
  }

  /// Handler reading signals from stdin
  pub fn stdin() -> Self {
    Self::from_reader(BufReader::new(tokio::io::stdin()))
  }

  /// Receive the next signal
  pub async fn next(&mut self) -> Option<ConnectivitySignal> {
    self.rx.recv().await
  }
}
