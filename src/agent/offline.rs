use color_eyre::Result;
use std::collections::HashSet;
use tracing::info;

use crate::cache::CacheStorage;
use crate::host::Host;
use crate::net::{Fetcher, Request};

use super::Agent;

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  /// Fetch every manifest resource not yet in the content cache.
  ///
  /// The batch is all-or-nothing, like install. Returns how many resources
  /// were fetched.
  pub async fn download_offline(&self) -> Result<usize> {
    let content = self.open(&self.caches.content)?;

    let present: HashSet<String> = content
      .keys()?
      .iter()
      .filter_map(|key| self.origin.stored_key(&key.url))
      .collect();

    let requests = self
      .manifest
      .missing_from(&present)
      .into_iter()
      .map(|key| self.origin.resolve(key).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    if requests.is_empty() {
      info!("Every resource is already available offline");
      return Ok(0);
    }

    let fetched = self.add_all(&content, requests).await?;
    info!(fetched, "Downloaded remaining resources for offline use");
    Ok(fetched)
  }
}

#[cfg(test)]
mod tests {
  use crate::net::Response;
  use crate::testing::{fixture, manifest};

  const CONTENT: &str = "app-cache";

  #[tokio::test]
  async fn test_fetches_exactly_the_missing_set() {
    let f = fixture(manifest(&[("a.js", "1"), ("b.js", "2"), ("/", "3")]), &[]);
    f.put(CONTENT, "a.js", Response::new(200, "a"));
    f.fetcher.respond("b.js", Response::new(200, "b"));
    f.fetcher.respond("/", Response::new(200, "root"));

    let fetched = f.agent.download_offline().await.unwrap();

    assert_eq!(fetched, 2);
    assert_eq!(f.fetcher.calls_to("a.js"), 0);
    assert_eq!(f.fetcher.calls_to("b.js"), 1);
    assert_eq!(f.fetcher.calls_to("/"), 1);
    let mut cached = f.cached_paths(CONTENT);
    cached.sort();
    assert_eq!(cached, vec!["/", "a.js", "b.js"]);
  }

  #[tokio::test]
  async fn test_nothing_missing_is_a_no_op() {
    let f = fixture(manifest(&[("a.js", "1")]), &[]);
    f.put(CONTENT, "a.js", Response::new(200, "a"));

    assert_eq!(f.agent.download_offline().await.unwrap(), 0);
    assert!(f.fetcher.requests().is_empty());
  }

  #[tokio::test]
  async fn test_partial_failure_stores_nothing() {
    let f = fixture(manifest(&[("a.js", "1"), ("b.js", "2")]), &[]);
    f.fetcher.respond("a.js", Response::new(200, "a"));
    f.fetcher.fail("b.js");

    assert!(f.agent.download_offline().await.is_err());
    assert!(f.cached_paths(CONTENT).is_empty());
  }
}
