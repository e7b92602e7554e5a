use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::http::Request;
use crate::network::Network;
use crate::notify::NotificationIntent;
use crate::sync::SyncTag;

/// Worker events
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  /// Outbound page request
  Fetch(Request),
  /// Raw push payload
  Push(Vec<u8>),
  NotificationClick(NotificationIntent),
  /// Explicit background sync trigger
  Sync(SyncTag),
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
}

/// Detects connectivity transitions by probing the origin.
pub struct ConnectivityMonitor {
  network: Arc<dyn Network>,
  probe: Request,
  online: Option<bool>,
}

impl ConnectivityMonitor {
  pub fn new(network: Arc<dyn Network>, probe: Request) -> Self {
    Self {
      network,
      probe,
      online: None,
    }
  }

  /// Probe once. Returns an event only when connectivity changed; the first
  /// probe always reports.
  pub async fn check(&mut self) -> Option<Event> {
    // Any answer, even an error status, means the network is reachable
    let online = self.network.fetch(&self.probe).await.is_ok();
    debug!(online, "connectivity probe");

    if self.online == Some(online) {
      return None;
    }
    self.online = Some(online);
    info!(online, "connectivity changed");
    Some(if online { Event::Online } else { Event::Offline })
  }
}

/// Event queue fed by the connectivity monitor.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Spawn the connectivity probe loop with the given interval
  pub fn watch(&self, mut monitor: ConnectivityMonitor, interval: Duration) -> JoinHandle<()> {
    let tx = self.tx.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        if let Some(event) = monitor.check().await {
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    })
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
