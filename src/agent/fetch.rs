use color_eyre::Result;
use reqwest::Method;
use tracing::{debug, warn};

use crate::cache::{CacheHandle, CacheStorage, Served};
use crate::host::Host;
use crate::manifest::ROOT_KEY;
use crate::net::{Fetcher, Request, Response};

use super::Agent;

/// What the agent decided to do with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not ours; the host performs its default network handling
  PassThrough,
  /// The agent answers the request
  Respond(Served),
}

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  /// Intercept a request from a controlled page.
  ///
  /// Only GET requests for resources listed in the manifest are handled.
  /// The entry document is fetched online-first, everything else cache-first.
  pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if request.method != Method::GET {
      return Ok(FetchOutcome::PassThrough);
    }

    let Some(key) = self.origin.request_key(&request.url) else {
      return Ok(FetchOutcome::PassThrough);
    };

    if !self.manifest.contains(&key) {
      debug!(url = %request.url, key = %key, "Not a build resource, passing through");
      return Ok(FetchOutcome::PassThrough);
    }

    let served = if key == ROOT_KEY {
      self.online_first(request).await?
    } else {
      self.cache_first(request).await?
    };

    Ok(FetchOutcome::Respond(served))
  }

  /// Serve from the content cache, populating it lazily from the network.
  async fn cache_first(&self, request: &Request) -> Result<Served> {
    let content = self.open(&self.caches.content)?;
    let key = request.key();

    if let Some(cached) = content.matching(&key)? {
      debug!(url = %request.url, "Cache hit");
      return Ok(Served::from_cache(cached));
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_ok() {
      self.store(&content, request, &response);
    }

    Ok(Served::from_network(response))
  }

  /// Write a network response to the content cache.
  ///
  /// A failed write never fails the request that produced the response.
  fn store(&self, content: &CacheHandle<'_, S>, request: &Request, response: &Response) {
    match content.put(&request.key(), response) {
      Ok(()) => debug!(url = %request.url, "Cached network response"),
      Err(err) => warn!(url = %request.url, error = %err, "Failed to cache network response"),
    }
  }

  /// Prefer the network, falling back to the cached copy when offline.
  ///
  /// Whatever the network returns is cached. Without a cached copy the network
  /// error is returned unchanged.
  async fn online_first(&self, request: &Request) -> Result<Served> {
    let content = self.open(&self.caches.content)?;
    let key = request.key();

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store(&content, request, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => match content.matching(&key)? {
        Some(cached) => {
          warn!(url = %request.url, error = %err, "Network unavailable, serving cached entry document");
          Ok(Served::offline(cached))
        }
        None => Err(err),
      },
    }
  }
}
