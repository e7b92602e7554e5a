//! Structured logging: stderr plus an optional daily-rotated file.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::db;

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// file writer and must be held until exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("tamy_sw={}", config.level)));

  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file_layer, guard) = if config.file {
    let log_dir = db::data_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

    let appender = tracing_appender::rolling::daily(&log_dir, "worker.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
    (Some(layer), Some(guard))
  } else {
    (None, None)
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
