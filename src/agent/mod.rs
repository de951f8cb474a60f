//! The cache synchronization agent.
//!
//! One agent instance corresponds to one build: it owns the build's resource
//! manifest and core shell list, and reacts to four lifecycle entry points:
//!
//! - `on_install`: stage the core shell into the temp cache
//! - `on_activate`: migrate the content cache to this build
//! - `on_fetch`: serve controlled requests cache-first or online-first
//! - `on_message`: handle control messages from pages
//!
//! All cache state lives behind an injected `CacheStorage`, network access
//! behind a `Fetcher`, and runtime signals behind a `Host`.

mod activate;
mod fetch;
mod install;
mod keys;
mod message;
mod offline;

pub use activate::Activation;
pub use fetch::FetchOutcome;
pub use install::Installed;
pub use keys::Origin;
pub use message::{ControlMessage, MessageOutcome};

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;

use crate::cache::{CacheHandle, CacheNames, CacheStorage};
use crate::host::Host;
use crate::manifest::{CoreShell, ResourceManifest};
use crate::net::{Fetcher, Request, RequestKey, Response};

/// Path, relative to the origin, under which the activated manifest is stored.
const MANIFEST_RECORD_PATH: &str = "manifest";

/// Everything that identifies one build of the application.
#[derive(Debug, Clone)]
pub struct AgentSettings {
  pub origin: Origin,
  pub manifest: ResourceManifest,
  pub core: CoreShell,
  pub caches: CacheNames,
}

pub struct Agent<S, F, H> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  host: Arc<H>,
  origin: Origin,
  manifest: ResourceManifest,
  core: CoreShell,
  caches: CacheNames,
}

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, host: Arc<H>, settings: AgentSettings) -> Self {
    Self {
      storage,
      fetcher,
      host,
      origin: settings.origin,
      manifest: settings.manifest,
      core: settings.core,
      caches: settings.caches,
    }
  }

  pub fn manifest(&self) -> &ResourceManifest {
    &self.manifest
  }

  pub fn origin(&self) -> &Origin {
    &self.origin
  }

  pub fn caches(&self) -> &CacheNames {
    &self.caches
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  /// Version identifier of the build this agent serves.
  pub fn version(&self) -> String {
    self.manifest.fingerprint()
  }

  fn open<'a>(&'a self, name: &'a str) -> Result<CacheHandle<'a, S>> {
    CacheHandle::open(self.storage.as_ref(), name)
  }

  fn manifest_record_key(&self) -> Result<RequestKey> {
    Ok(RequestKey::get(&self.origin.resolve(MANIFEST_RECORD_PATH)?))
  }

  /// Fetch every request, failing unless all succeed with an ok status.
  async fn fetch_all(&self, requests: Vec<Request>) -> Result<Vec<(RequestKey, Response)>> {
    let fetches = requests.into_iter().map(|request| async move {
      let response = self.fetcher.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Request for {} failed with status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    });

    try_join_all(fetches).await
  }

  /// Fetch every request, then store all responses in one batch.
  ///
  /// Nothing is written unless every request succeeds with an ok status.
  async fn add_all(&self, cache: &CacheHandle<'_, S>, requests: Vec<Request>) -> Result<usize> {
    let entries = self.fetch_all(requests).await?;
    cache.put_all(&entries)?;
    Ok(entries.len())
  }
}
