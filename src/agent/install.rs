use color_eyre::Result;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::host::Host;
use crate::net::{CacheMode, Fetcher, Request};

use super::Agent;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
  /// Shell files staged in the temp cache
  pub staged: usize,
}

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  /// Stage the core shell into the temp cache.
  ///
  /// Every shell file is fetched straight from the origin. If any of them
  /// fails the install fails and the temp cache is left untouched. On success
  /// the temp cache holds exactly this build's shell, replacing anything
  /// staged by an earlier install that was never activated.
  pub async fn on_install(&self) -> Result<Installed> {
    self.host.skip_waiting();

    let requests = self
      .core
      .iter()
      .map(|path| {
        self
          .origin
          .resolve(path)
          .map(|url| Request::get(url).with_cache_mode(CacheMode::Reload))
      })
      .collect::<Result<Vec<_>>>()?;

    let entries = self.fetch_all(requests).await?;

    if self.storage.delete_cache(&self.caches.temp)? {
      debug!(cache = %self.caches.temp, "Discarded shell staged by an earlier install");
    }
    let temp = self.open(&self.caches.temp)?;
    temp.put_all(&entries)?;
    let staged = entries.len();
    info!(staged, cache = %self.caches.temp, "Core shell staged");

    Ok(Installed { staged })
  }
}
