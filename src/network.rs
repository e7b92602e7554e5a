//! Live network access.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use thiserror::Error;
use tracing::debug;

use crate::http::{Request, Response};

/// Failure to obtain a live response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  /// Host unreachable, DNS failure or no connectivity.
  #[error("network is offline")]
  Offline,

  /// The platform's default timeout elapsed.
  #[error("request timed out")]
  Timeout,

  /// Any other transport-level failure.
  #[error("transport error: {0}")]
  Transport(String),
}

/// Performs live fetches.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Network access over HTTP(S).
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("tamy-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    debug!(identity = %request.identity(), "live fetch");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(classify)?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await.map_err(classify)?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

fn classify(error: reqwest::Error) -> FetchError {
  if error.is_timeout() {
    FetchError::Timeout
  } else if error.is_connect() {
    FetchError::Offline
  } else {
    FetchError::Transport(error.to_string())
  }
}

/// Network that is always unreachable. Used to exercise the offline path.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
    Err(FetchError::Offline)
  }
}
