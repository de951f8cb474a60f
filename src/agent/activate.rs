use color_eyre::Result;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheHandle, CacheStorage};
use crate::host::Host;
use crate::manifest::ResourceManifest;
use crate::net::{Fetcher, RequestKey, Response};

use super::Agent;

/// How the content cache was brought in line with this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
  /// No previous build was recorded; content was rebuilt from the temp cache
  Fresh { copied: usize },
  /// A previous build was recorded; unchanged entries were kept
  Upgraded {
    evicted: usize,
    retained: usize,
    copied: usize,
  },
  /// Migration failed and every cache was wiped
  Reset { reason: String },
}

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  /// Migrate the content cache to this build.
  ///
  /// On any failure all three caches are deleted: an empty cache is
  /// preferred over one that is partially migrated. The returned outcome
  /// is `Activation::Reset` in that case, not an error.
  pub async fn on_activate(&self) -> Result<Activation> {
    match self.migrate() {
      Ok(outcome) => {
        info!(?outcome, version = %self.version(), "Agent activated");
        Ok(outcome)
      }
      Err(err) => {
        error!(error = %err, "Failed to upgrade cache agent");
        for name in self.caches.all() {
          if let Err(e) = self.storage.delete_cache(name) {
            warn!(cache = name, error = %e, "Failed to delete cache after failed upgrade");
          }
        }
        Ok(Activation::Reset {
          reason: err.to_string(),
        })
      }
    }
  }

  fn migrate(&self) -> Result<Activation> {
    let content = self.open(&self.caches.content)?;
    let temp = self.open(&self.caches.temp)?;
    let record = self.open(&self.caches.manifest)?;
    let record_key = self.manifest_record_key()?;

    let Some(stored) = record.matching(&record_key)? else {
      // First install: whatever is in content predates any recorded build
      self.storage.delete_cache(&self.caches.content)?;
      let content = self.open(&self.caches.content)?;
      let copied = temp.copy_into(&content)?;
      self.storage.delete_cache(&self.caches.temp)?;
      self.store_manifest(&record, &record_key)?;
      self.host.claim_clients();
      return Ok(Activation::Fresh { copied });
    };

    let previous = ResourceManifest::from_slice(&stored.body)?;
    let mut evicted = 0;
    let mut retained = 0;

    for key in content.keys()? {
      let logical = self.origin.stored_key(&key.url);
      let unchanged = logical.as_deref().is_some_and(|k| {
        matches!(self.manifest.hash(k), Some(hash) if previous.hash(k) == Some(hash))
      });

      if unchanged {
        retained += 1;
      } else {
        debug!(url = %key.url, "Evicting stale resource");
        content.delete(&key)?;
        evicted += 1;
      }
    }

    // Shell files from this build win over anything retained above
    let copied = temp.copy_into(&content)?;
    self.storage.delete_cache(&self.caches.temp)?;
    self.store_manifest(&record, &record_key)?;
    self.host.claim_clients();

    Ok(Activation::Upgraded {
      evicted,
      retained,
      copied,
    })
  }

  fn store_manifest(&self, record: &CacheHandle<'_, S>, key: &RequestKey) -> Result<()> {
    let json = self.manifest.to_json()?;
    let response = Response::new(200, json).with_header("Content-Type", "application/json");
    record.put(key, &response)
  }

  /// Manifest of the last activated build, if one is recorded.
  pub fn stored_manifest(&self) -> Result<Option<ResourceManifest>> {
    let key = self.manifest_record_key()?;
    match self.storage.get(&self.caches.manifest, &key)? {
      Some(response) => Ok(Some(ResourceManifest::from_slice(&response.body)?)),
      None => Ok(None),
    }
  }
}
