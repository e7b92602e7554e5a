//! Command-line commands

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;

use crate::backend::Profile;
use crate::sync::SyncTag;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Populate the configured cache generation with the app shell, then activate
  Install,

  /// Prune superseded cache generations and claim open windows
  Activate,

  /// Send a request through the fetch strategy
  Fetch {
    url: String,

    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Accept header, e.g. text/html for a navigation
    #[arg(short, long)]
    accept: Option<String>,

    /// Simulate a failed live fetch
    #[arg(long)]
    offline: bool,

    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Inspect cache generations
  Cache {
    #[command(subcommand)]
    view: Option<CacheView>,
  },

  /// Inspect or append to the sync queue
  Queue {
    #[command(subcommand)]
    action: Option<QueueAction>,
  },

  /// Drain the sync queue
  Sync {
    #[arg(short, long, value_enum, default_value = "sync-all")]
    tag: SyncTag,
  },

  /// Show a notification for a push payload
  Push {
    /// JSON or plain text; empty when omitted
    payload: Option<String>,

    /// Route a click on the notification right away
    #[arg(long)]
    click: bool,
  },

  /// Route a notification click to a window at the given URL
  Click { url: String },

  /// Send a chat message to the AI persona
  Chat {
    #[arg(short, long)]
    user: String,

    text: String,
  },

  /// Show a user's profiles and remaining chats
  User {
    id: String,

    /// Grant additional chats
    #[arg(long)]
    add_chats: Option<u32>,
  },

  /// Watch connectivity and drain the queue when it comes back
  Watch {
    /// Probe interval in seconds
    #[arg(short, long, default_value_t = 30)]
    interval: u64,
  },

  /// Show lifecycle state, cache generations and queue size
  Status,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheView {
  /// List generations, oldest first
  Generations,
  /// List entries of a generation (default: current)
  Entries { generation: Option<String> },
}

#[derive(Subcommand, Debug, Clone)]
pub enum QueueAction {
  /// List queued mutations
  List {
    /// Include delivered mutations
    #[arg(short, long)]
    all: bool,
  },
  /// Queue a chat message
  Message {
    #[arg(short, long)]
    user: String,

    content: String,

    /// Message is from the AI persona
    #[arg(long)]
    ai: bool,
  },
  /// Queue a profile update from key=value fields
  Profile {
    #[arg(short, long)]
    user: String,

    /// Update the AI persona profile instead of the user's
    #[arg(long)]
    ai: bool,

    #[arg(required = true)]
    fields: Vec<String>,
  },
  /// Remove delivered mutations
  Purge,
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type,
/// anything else is a string.
pub fn parse_fields(pairs: &[String]) -> Result<Profile> {
  let mut fields = Profile::new();
  for pair in pairs {
    let (key, raw) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Expected key=value, got '{}'", pair))?;
    if key.is_empty() {
      return Err(eyre!("Empty field name in '{}'", pair));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    fields.insert(key.to_string(), value);
  }
  Ok(fields)
}
