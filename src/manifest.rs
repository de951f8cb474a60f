//! Resource manifest and core shell list.
//!
//! The manifest maps every origin-relative resource path of a build to an
//! opaque content hash. It is produced by the build tooling and replaced
//! wholesale on each release; the agent never mutates it.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

/// Manifest key of the application entry document (the site root).
pub const ROOT_KEY: &str = "/";

/// Mapping from logical resource path to content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceManifest(BTreeMap<String, String>);

impl ResourceManifest {
  /// Parse a manifest from its flat JSON object form.
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Failed to parse resource manifest: {}", e))
  }

  /// Parse a manifest from raw bytes, e.g. a stored response body.
  pub fn from_slice(bytes: &[u8]) -> Result<Self> {
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to parse resource manifest: {}", e))
  }

  /// Load a manifest file written by the build tooling.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read manifest {}: {}", path.display(), e))?;
    Self::from_json(&contents)
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string(&self.0).map_err(|e| eyre!("Failed to serialize manifest: {}", e))
  }

  /// Content hash recorded for `key`, if the key belongs to this build.
  pub fn hash(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Stable digest of the whole manifest, used as the agent version.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    for (key, hash) in &self.0 {
      hasher.update(key.as_bytes());
      hasher.update([0u8]);
      hasher.update(hash.as_bytes());
      hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
  }

  /// Keys of this manifest that are not in `present`, in manifest order.
  pub fn missing_from<'a>(&'a self, present: &HashSet<String>) -> Vec<&'a str> {
    self
      .keys()
      .filter(|key| !present.contains(*key))
      .collect()
  }
}

impl FromIterator<(String, String)> for ResourceManifest {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Ordered list of resources the application needs to boot offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreShell(Vec<String>);

impl CoreShell {
  /// Build the shell list, warning about entries the manifest doesn't know.
  pub fn new(paths: Vec<String>, manifest: &ResourceManifest) -> Self {
    for path in &paths {
      if !manifest.contains(path) {
        warn!(path = %path, "Core shell entry is not listed in the resource manifest");
      }
    }
    Self(paths)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }
}
