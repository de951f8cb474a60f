//! Request and response snapshots exchanged with the network and the caches.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How a request interacts with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  /// Normal HTTP caching semantics
  #[default]
  Default,
  /// Force a round-trip to the origin, ignoring intermediate caches
  Reload,
}

/// An outgoing request
#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub cache_mode: CacheMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      url,
      method,
      cache_mode: CacheMode::Default,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
    self.cache_mode = cache_mode;
    self
  }

  /// Identity of this request inside a cache store.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.url, &self.method)
  }
}

/// Identity of a cached request: URL (without fragment) and method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub url: String,
  pub method: String,
}

impl RequestKey {
  pub fn new(url: &Url, method: &Method) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      url: url.into(),
      method: method.as_str().to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(url, &Method::GET)
  }
}

/// Full snapshot of an HTTP response (status, headers and body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// True for any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
