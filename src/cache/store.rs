//! Handle onto one named cache inside a storage backend.

use color_eyre::Result;

use crate::net::{RequestKey, Response};

use super::storage::CacheStorage;

/// Names of the three caches the agent owns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct CacheNames {
  /// Resources served to pages
  pub content: String,
  /// Shell files staged during install
  pub temp: String,
  /// Holds the manifest of the last activated build
  pub manifest: String,
}

impl Default for CacheNames {
  fn default() -> Self {
    Self {
      content: "app-cache".to_string(),
      temp: "app-temp-cache".to_string(),
      manifest: "app-manifest".to_string(),
    }
  }
}

impl CacheNames {
  pub fn all(&self) -> [&str; 3] {
    [self.content.as_str(), self.temp.as_str(), self.manifest.as_str()]
  }
}

/// An opened cache. Creating the handle creates the cache if needed.
pub struct CacheHandle<'a, S: CacheStorage + ?Sized> {
  storage: &'a S,
  name: &'a str,
}

impl<'a, S: CacheStorage + ?Sized> CacheHandle<'a, S> {
  pub fn open(storage: &'a S, name: &'a str) -> Result<Self> {
    storage.open(name)?;
    Ok(Self { storage, name })
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(self.name)
  }

  pub fn matching(&self, key: &RequestKey) -> Result<Option<Response>> {
    self.storage.get(self.name, key)
  }

  pub fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
    self.storage.put(self.name, key, response)
  }

  pub fn put_all(&self, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.storage.put_all(self.name, entries)
  }

  pub fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.storage.delete(self.name, key)
  }

  /// Copy every entry of this cache into `target`, overwriting.
  pub fn copy_into(&self, target: &CacheHandle<'_, S>) -> Result<usize> {
    let mut copied = 0;
    for key in self.keys()? {
      if let Some(response) = self.matching(&key)? {
        target.put(&key, &response)?;
        copied += 1;
      }
    }
    Ok(copied)
  }
}
