//! Request/response model shared by the fetch strategy, cache store and network layer.

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Body of the synthesized response for requests that can be served neither
/// from the network nor from the cache.
pub const OFFLINE_BODY: &str =
  "Không thể kết nối đến mạng và không tìm thấy tài nguyên trong cache.";

/// Outbound request seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Canonical identity: method and URL without fragment.
  pub fn identity(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }

  /// Stable fixed-length storage key derived from the identity.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.identity().as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Whether the request declares an HTML-accepting context.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }
}

/// Response snapshot (status, headers and the full body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// 503 with a plain-text explanation.
  pub fn service_unavailable() -> Self {
    Self::new(503, OFFLINE_BODY).with_header("content-type", "text/plain; charset=utf-8")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_identity_ignores_fragment() {
    let a = Request::get(url("https://tamy.example/app.js#top"));
    let b = Request::get(url("https://tamy.example/app.js"));
    assert_eq!(a.identity(), "GET https://tamy.example/app.js");
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_identity_includes_method() {
    let get = Request::get(url("https://tamy.example/app.js"));
    let post = Request::new(Method::POST, url("https://tamy.example/app.js"));
    assert_ne!(get.cache_key(), post.cache_key());
    assert_eq!(get.cache_key().len(), 64);
  }

  #[test]
  fn test_accepts_html() {
    let nav = Request::get(url("https://tamy.example/chat"))
      .with_header("Accept", "text/html,application/xhtml+xml");
    let script = Request::get(url("https://tamy.example/app.js")).with_header("Accept", "*/*");
    let bare = Request::get(url("https://tamy.example/app.js"));

    assert!(nav.accepts_html());
    assert!(!script.accepts_html());
    assert!(!bare.accepts_html());
  }

  #[test]
  fn test_non_http_scheme() {
    assert!(!Request::get(url("chrome-extension://abc/x.js")).is_http());
    assert!(Request::get(url("http://localhost/")).is_http());
  }

  #[test]
  fn test_service_unavailable_is_plain_text() {
    let response = Response::service_unavailable();
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert!(response.header("Content-Type").unwrap().starts_with("text/plain"));
    assert!(!response.body.is_empty());
  }
}
