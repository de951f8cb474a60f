//! Mapping between request URLs and logical manifest keys.

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::manifest::ROOT_KEY;

/// Cache-busting marker the page appends to asset URLs.
const VERSION_MARKER: &str = "?v=";

/// The origin an agent is registered for.
#[derive(Debug, Clone)]
pub struct Origin {
  root: Url,
  /// ASCII serialization without trailing slash, e.g. `https://app.test:8080`
  prefix: String,
}

impl Origin {
  pub fn parse(origin: &str) -> Result<Self> {
    let url = Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;
    match url.scheme() {
      "http" | "https" => {}
      other => return Err(eyre!("Unsupported origin scheme: {}", other)),
    }

    let prefix = url.origin().ascii_serialization();
    let root = Url::parse(&format!("{}/", prefix))
      .map_err(|e| eyre!("Invalid origin {}: {}", origin, e))?;

    Ok(Self { root, prefix })
  }

  pub fn as_str(&self) -> &str {
    &self.prefix
  }

  /// Absolute URL of a manifest key. The root key maps to the origin itself.
  pub fn resolve(&self, key: &str) -> Result<Url> {
    if key == ROOT_KEY {
      return Ok(self.root.clone());
    }
    self
      .root
      .join(key)
      .map_err(|e| eyre!("Cannot resolve {} against {}: {}", key, self.prefix, e))
  }

  /// Everything after `<origin>/`, or None for other origins.
  fn relative<'u>(&self, url: &'u str) -> Option<&'u str> {
    let rest = url.strip_prefix(self.prefix.as_str())?;
    if rest.is_empty() {
      return Some("");
    }
    rest.strip_prefix('/')
  }

  /// Key of a stored cache entry: the origin-relative URL, empty meaning root.
  ///
  /// Query strings are kept, so a versioned URL never matches a manifest key.
  pub fn stored_key(&self, url: &str) -> Option<String> {
    let rest = self.relative(url)?;
    if rest.is_empty() {
      Some(ROOT_KEY.to_string())
    } else {
      Some(rest.to_string())
    }
  }

  /// Key used to decide whether an outgoing request is intercepted.
  ///
  /// Drops a trailing `?v=` version marker; the bare origin, `<origin>/#...`
  /// and an empty remainder all map to the root key.
  pub fn request_key(&self, url: &Url) -> Option<String> {
    let rest = self.relative(url.as_str())?;
    if rest.starts_with('#') {
      return Some(ROOT_KEY.to_string());
    }

    let key = match rest.find(VERSION_MARKER) {
      Some(idx) => &rest[..idx],
      None => rest,
    };

    if key.is_empty() {
      Some(ROOT_KEY.to_string())
    } else {
      Some(key.to_string())
    }
  }
}
