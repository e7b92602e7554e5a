use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::Notifier;
use crate::clients::WindowClients;
use crate::config::NotificationsConfig;

/// Notification derived from a push payload. Consumed once to display it and,
/// on click, to route to a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Relative to the worker origin unless absolute
  pub target_url: String,
}

/// Result of routing a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An existing window at the target was focused
  Focused(String),
  /// A new window was opened at the absolute target URL
  Opened(String),
  Failed(String),
}

#[derive(Debug, Default, Deserialize)]
struct PushFields {
  title: Option<String>,
  body: Option<String>,
  message: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  url: Option<String>,
  click_action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
  notification: PushFields,
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

impl NotificationIntent {
  /// Interpret a push payload. Never fails: missing fields take the configured
  /// defaults and a non-JSON payload is shown as plain text.
  pub fn from_payload(payload: &[u8], defaults: &NotificationsConfig) -> Self {
    let text = String::from_utf8_lossy(payload);

    let fields = serde_json::from_str::<PushEnvelope>(&text)
      .map(|envelope| envelope.notification)
      .or_else(|_| serde_json::from_str::<PushFields>(&text));

    let fields = match fields {
      Ok(fields) => fields,
      Err(e) => {
        debug!(error = %e, "push payload is not structured, using it as text");
        let body = text.trim();
        PushFields {
          body: (!body.is_empty()).then(|| body.to_string()),
          ..PushFields::default()
        }
      }
    };

    Self {
      title: non_empty(fields.title).unwrap_or_else(|| defaults.app_name.clone()),
      body: non_empty(fields.message)
        .or(non_empty(fields.body))
        .unwrap_or_else(|| defaults.default_body.clone()),
      icon: non_empty(fields.icon).unwrap_or_else(|| defaults.icon.clone()),
      badge: non_empty(fields.badge).unwrap_or_else(|| defaults.badge.clone()),
      vibrate: defaults.vibrate.clone(),
      target_url: non_empty(fields.url)
        .or(non_empty(fields.click_action))
        .unwrap_or_else(|| "/".to_string()),
    }
  }
}

pub struct NotificationDispatcher {
  notifier: Arc<dyn Notifier>,
  windows: Arc<dyn WindowClients>,
  defaults: NotificationsConfig,
  origin: Url,
}

impl NotificationDispatcher {
  pub fn new(
    notifier: Arc<dyn Notifier>,
    windows: Arc<dyn WindowClients>,
    defaults: NotificationsConfig,
    origin: Url,
  ) -> Self {
    Self {
      notifier,
      windows,
      defaults,
      origin,
    }
  }

  /// Build and display the notification for a push payload.
  pub async fn on_push(&self, payload: &[u8]) -> NotificationIntent {
    let intent = NotificationIntent::from_payload(payload, &self.defaults);
    info!(title = %intent.title, target = %intent.target_url, "push received");

    if let Err(e) = self.notifier.show(&intent).await {
      warn!(error = %e, "failed to show notification");
    }
    intent
  }

  /// Close the notification, then focus a window already at the target or
  /// open a new one there.
  pub async fn on_notification_click(&self, intent: &NotificationIntent) -> ClickOutcome {
    if let Err(e) = self.notifier.close(intent).await {
      warn!(error = %e, "failed to close notification");
    }

    match self.route(intent).await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(target = %intent.target_url, error = %e, "notification click routing failed");
        ClickOutcome::Failed(e.to_string())
      }
    }
  }

  async fn route(&self, intent: &NotificationIntent) -> Result<ClickOutcome> {
    let target = self
      .origin
      .join(&intent.target_url)
      .map_err(|e| eyre!("Invalid notification target '{}': {}", intent.target_url, e))?;

    let existing = self
      .windows
      .list()
      .await?
      .into_iter()
      .find(|client| Url::parse(&client.url).map_or(false, |url| url == target));

    if let Some(client) = existing {
      match self.windows.focus(&client.id).await {
        Ok(()) => return Ok(ClickOutcome::Focused(client.id)),
        Err(e) => {
          warn!(client = %client.id, error = %e, "window did not take focus, opening a new one");
          if let Err(e) = self.windows.close(&client.id).await {
            warn!(client = %client.id, error = %e, "failed to forget window client");
          }
        }
      }
    }

    let opened = self.windows.open(target.as_str()).await?;
    Ok(ClickOutcome::Opened(opened.url))
  }
}
