//! Local host runtime: drives an agent through its lifecycle.
//!
//! A browser decides when to install and activate a worker and which pages it
//! controls. `Runtime` makes those decisions for a single origin, keyed by the
//! manifest fingerprint, and records them in the `LocalHost` registration.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::{Activation, Agent, AgentSettings, FetchOutcome, MessageOutcome, Origin};
use crate::cache::{CacheStorage, Served, SqliteStorage};
use crate::config::Config;
use crate::host::{LocalHost, Registration};
use crate::manifest::{CoreShell, ResourceManifest};
use crate::net::{Fetcher, HttpFetcher, Request};

/// Result of `Runtime::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
  /// This build is already active
  UpToDate,
  /// This build is installed and waiting to be promoted
  Waiting,
  /// This build was installed (if needed) and activated
  Activated(Activation),
}

/// Result of posting a message to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
  pub outcome: MessageOutcome,
  /// Set when the message promoted a waiting build
  pub promoted: Option<Activation>,
}

/// Snapshot of the registration and caches.
#[derive(Debug, Clone)]
pub struct Status {
  pub version: String,
  pub registration: Registration,
  /// Entry count per existing cache
  pub caches: Vec<(String, usize)>,
  /// Manifest resources present in the content cache
  pub cached_resources: usize,
  pub total_resources: usize,
}

pub struct Runtime<S, F> {
  agent: Agent<S, F, LocalHost>,
  host: Arc<LocalHost>,
}

impl Runtime<SqliteStorage, HttpFetcher> {
  /// Build the runtime described by a configuration file.
  pub fn open(config: &Config) -> Result<Self> {
    let manifest = ResourceManifest::load(&config.manifest)?;
    if manifest.is_empty() {
      warn!(path = %config.manifest.display(), "Resource manifest lists no resources");
    }
    let core = CoreShell::new(config.core.clone(), &manifest);
    let settings = AgentSettings {
      origin: Origin::parse(&config.origin)?,
      manifest,
      core,
      caches: config.caches.clone(),
    };

    let storage = SqliteStorage::open(&config.database_path()?)?;
    let fetcher = HttpFetcher::new(&config.http)?;
    let host = LocalHost::load(config.registration_path()?)?;

    Ok(Self::new(
      Arc::new(storage),
      Arc::new(fetcher),
      Arc::new(host),
      settings,
    ))
  }
}

impl<S, F> Runtime<S, F>
where
  S: CacheStorage,
  F: Fetcher,
{
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, host: Arc<LocalHost>, settings: AgentSettings) -> Self {
    let agent = Agent::new(storage, fetcher, host.clone(), settings);
    Self { agent, host }
  }

  pub fn agent(&self) -> &Agent<S, F, LocalHost> {
    &self.agent
  }

  /// Install and activate this build if it isn't active yet.
  ///
  /// With `install_only` the build is staged but not activated; a later
  /// update or a `skipWaiting` message promotes it. A failed install leaves
  /// the registration untouched.
  pub async fn update(&self, install_only: bool) -> Result<UpdateOutcome> {
    let version = self.agent.version();
    let registration = self.host.registration();

    if registration.is_active(&version) {
      debug!(version = %version, "Build already active");
      return Ok(UpdateOutcome::UpToDate);
    }

    if !registration.is_waiting(&version) {
      self.agent.on_install().await?;
      self.host.update(|r| {
        r.waiting_version = Some(version.clone());
        r.installed_at = Some(Utc::now());
      })?;
      info!(version = %version, "Build installed");
    }

    if install_only {
      return Ok(UpdateOutcome::Waiting);
    }

    let registration = self.host.registration();
    if registration.skip_waiting || registration.active_version.is_none() {
      let activation = self.activate().await?;
      Ok(UpdateOutcome::Activated(activation))
    } else {
      Ok(UpdateOutcome::Waiting)
    }
  }

  async fn activate(&self) -> Result<Activation> {
    let version = self.agent.version();
    self.host.update(|r| r.clients_claimed = false)?;

    let activation = self.agent.on_activate().await?;

    self.host.update(|r| {
      r.active_version = Some(version.clone());
      r.waiting_version = None;
      r.skip_waiting = false;
      r.activated_at = Some(Utc::now());
    })?;

    Ok(activation)
  }

  /// Dispatch a page request.
  ///
  /// Requests are only intercepted once this build is active; otherwise, and
  /// whenever the agent passes, the network is used directly.
  pub async fn fetch(&self, request: &Request) -> Result<Served> {
    if self.host.registration().is_active(&self.agent.version()) {
      if let FetchOutcome::Respond(served) = self.agent.on_fetch(request).await? {
        return Ok(served);
      }
    } else {
      debug!(url = %request.url, "Build not active, request is uncontrolled");
    }

    let response = self.agent.fetcher().fetch(request).await?;
    Ok(Served::from_network(response))
  }

  /// Post a message to the agent, promoting this build if it asks to skip waiting.
  pub async fn post_message(&self, data: &str) -> Result<Delivery> {
    let outcome = self.agent.on_message(data).await?;
    let version = self.agent.version();

    let registration = self.host.registration();
    let promoted = if registration.skip_waiting && registration.is_waiting(&version) {
      Some(self.activate().await?)
    } else {
      // Persist the flag for a later update
      self.host.update(|_| {})?;
      None
    };

    Ok(Delivery { outcome, promoted })
  }

  pub fn status(&self) -> Result<Status> {
    let storage = self.agent.storage();
    let caches = storage
      .cache_names()?
      .into_iter()
      .map(|name| storage.keys(&name).map(|keys| (name, keys.len())))
      .collect::<Result<Vec<_>>>()?;

    let origin = self.agent.origin();
    let manifest = self.agent.manifest();
    let cached_resources = storage
      .keys(&self.agent.caches().content)?
      .iter()
      .filter_map(|key| origin.stored_key(&key.url))
      .filter(|key| manifest.contains(key))
      .count();

    Ok(Status {
      version: self.agent.version(),
      registration: self.host.registration(),
      caches,
      cached_resources,
      total_resources: manifest.len(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ServedFrom};
  use crate::net::Response;
  use crate::testing::{manifest, settings, url_for, StubFetcher};

  struct Setup {
    storage: Arc<MemoryStorage>,
    fetcher: Arc<StubFetcher>,
    host: Arc<LocalHost>,
  }

  impl Setup {
    fn new() -> Self {
      Self {
        storage: Arc::new(MemoryStorage::new()),
        fetcher: Arc::new(StubFetcher::default()),
        host: Arc::new(LocalHost::in_memory()),
      }
    }

    fn runtime(&self, m: ResourceManifest, core: &[&str]) -> Runtime<MemoryStorage, StubFetcher> {
      Runtime::new(
        self.storage.clone(),
        self.fetcher.clone(),
        self.host.clone(),
        settings(m, core),
      )
    }
  }

  #[tokio::test]
  async fn test_first_update_installs_and_activates() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let runtime = setup.runtime(manifest(&[("a.js", "1"), ("/", "2")]), &["a.js"]);

    let outcome = runtime.update(false).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::Activated(Activation::Fresh { copied: 1 }));
    let reg = setup.host.registration();
    assert!(reg.is_active(&runtime.agent().version()));
    assert!(reg.waiting_version.is_none());
    assert!(reg.clients_claimed);
    assert!(!reg.skip_waiting);
  }

  #[tokio::test]
  async fn test_update_is_single_flight_per_version() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let runtime = setup.runtime(manifest(&[("a.js", "1")]), &["a.js"]);

    runtime.update(false).await.unwrap();
    let outcome = runtime.update(false).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::UpToDate);
    assert_eq!(setup.fetcher.calls_to("a.js"), 1);
  }

  #[tokio::test]
  async fn test_install_only_waits_for_skip_waiting_message() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let runtime = setup.runtime(manifest(&[("a.js", "1")]), &["a.js"]);

    assert_eq!(runtime.update(true).await.unwrap(), UpdateOutcome::Waiting);
    assert!(setup.host.registration().active_version.is_none());

    let delivery = runtime.post_message("skipWaiting").await.unwrap();

    assert_eq!(delivery.outcome, MessageOutcome::SkippedWaiting);
    assert_eq!(delivery.promoted, Some(Activation::Fresh { copied: 1 }));
    assert!(setup.host.registration().is_active(&runtime.agent().version()));
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_build() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let v1 = setup.runtime(manifest(&[("a.js", "1")]), &["a.js"]);
    v1.update(false).await.unwrap();

    setup.fetcher.fail("a.js");
    let v2 = setup.runtime(manifest(&[("a.js", "2")]), &["a.js"]);

    assert!(v2.update(false).await.is_err());
    let reg = setup.host.registration();
    assert!(reg.is_active(&v1.agent().version()));
    assert!(reg.waiting_version.is_none());
  }

  #[tokio::test]
  async fn test_newer_build_does_not_activate_shell_of_skipped_build() {
    let setup = Setup::new();
    setup.fetcher.respond("index.html", Response::new(200, "<html>"));
    let v1 = setup.runtime(manifest(&[("a.js", "h1"), ("index.html", "i1")]), &["index.html"]);
    v1.update(false).await.unwrap();

    setup.fetcher.respond("a.js", Response::new(200, "a v2"));
    let v2 = setup.runtime(
      manifest(&[("a.js", "h2"), ("index.html", "i1")]),
      &["a.js", "index.html"],
    );
    assert_eq!(v2.update(true).await.unwrap(), UpdateOutcome::Waiting);

    setup.fetcher.respond("a.js", Response::new(200, "a v3"));
    let v3 = setup.runtime(manifest(&[("a.js", "h3"), ("index.html", "i1")]), &["index.html"]);
    let outcome = v3.update(false).await.unwrap();

    assert_eq!(
      outcome,
      UpdateOutcome::Activated(Activation::Upgraded {
        evicted: 0,
        retained: 1,
        copied: 1
      })
    );
    let served = v3.fetch(&Request::get(url_for("a.js"))).await.unwrap();
    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(served.response.body, b"a v3");
  }

  #[tokio::test]
  async fn test_uncontrolled_fetch_goes_to_network() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let runtime = setup.runtime(manifest(&[("a.js", "1")]), &[]);

    let served = runtime.fetch(&Request::get(url_for("a.js"))).await.unwrap();

    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(setup.storage.write_count(), 0);
  }

  #[tokio::test]
  async fn test_controlled_fetch_uses_cache() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    setup.fetcher.respond("b.js", Response::new(200, "b"));
    let runtime = setup.runtime(manifest(&[("a.js", "1"), ("b.js", "2")]), &["a.js"]);
    runtime.update(false).await.unwrap();

    let hit = runtime.fetch(&Request::get(url_for("a.js"))).await.unwrap();
    let miss = runtime.fetch(&Request::get(url_for("b.js"))).await.unwrap();

    assert_eq!(hit.source, ServedFrom::Cache);
    assert_eq!(miss.source, ServedFrom::Network);
    assert_eq!(setup.fetcher.calls_to("a.js"), 1);
  }

  #[tokio::test]
  async fn test_passed_through_request_is_fetched_directly() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    setup.fetcher.respond("random.txt", Response::new(200, "r"));
    let runtime = setup.runtime(manifest(&[("a.js", "1")]), &["a.js"]);
    runtime.update(false).await.unwrap();

    let served = runtime.fetch(&Request::get(url_for("random.txt"))).await.unwrap();

    assert_eq!(served.response.body, b"r");
    assert_eq!(runtime.status().unwrap().caches, vec![
      ("app-cache".to_string(), 1),
      ("app-manifest".to_string(), 1),
    ]);
  }

  #[tokio::test]
  async fn test_status_reports_coverage() {
    let setup = Setup::new();
    setup.fetcher.respond("a.js", Response::new(200, "a"));
    let runtime = setup.runtime(manifest(&[("a.js", "1"), ("b.js", "2"), ("/", "3")]), &["a.js"]);
    runtime.update(false).await.unwrap();

    let status = runtime.status().unwrap();

    assert_eq!(status.cached_resources, 1);
    assert_eq!(status.total_resources, 3);
    assert_eq!(status.version, runtime.agent().version());
    assert!(status.registration.is_active(&status.version));
  }
}
