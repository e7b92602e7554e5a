//! Push notifications and notification-click routing.

mod dispatcher;

pub use dispatcher::{ClickOutcome, NotificationDispatcher, NotificationIntent};

use async_trait::async_trait;
use color_eyre::Result;

/// Surface that displays notifications to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, intent: &NotificationIntent) -> Result<()>;

  async fn close(&self, intent: &NotificationIntent) -> Result<()>;
}

/// Prints notifications to stdout.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
  async fn show(&self, intent: &NotificationIntent) -> Result<()> {
    println!("[{}] {}", intent.title, intent.body);
    println!("  -> {}", intent.target_url);
    Ok(())
  }

  async fn close(&self, _intent: &NotificationIntent) -> Result<()> {
    Ok(())
  }
}
