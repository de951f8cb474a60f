//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::agent::{Agent, AgentSettings, Origin};
use crate::cache::{CacheNames, CacheStorage, MemoryStorage};
use crate::host::Host;
use crate::manifest::{CoreShell, ResourceManifest};
use crate::net::{Fetcher, Request, RequestKey, Response};

pub const ORIGIN: &str = "https://app.test";

/// Absolute URL of a path on the test origin; "/" is the root.
pub fn url_for(path: &str) -> Url {
  let origin = Origin::parse(ORIGIN).unwrap();
  origin.resolve(path).unwrap()
}

pub fn manifest(entries: &[(&str, &str)]) -> ResourceManifest {
  entries
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

enum Route {
  Respond(Response),
  Fail,
}

/// Fetcher answering from a fixed routing table and recording every request.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Route>>,
  requests: Mutex<Vec<Request>>,
}

impl StubFetcher {
  pub fn respond(&self, path: &str, response: Response) {
    let key = RequestKey::get(&url_for(path)).url;
    self.routes.lock().unwrap().insert(key, Route::Respond(response));
  }

  pub fn fail(&self, path: &str) {
    let key = RequestKey::get(&url_for(path)).url;
    self.routes.lock().unwrap().insert(key, Route::Fail);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub fn calls_to(&self, path: &str) -> usize {
    let target = RequestKey::get(&url_for(path)).url;
    self
      .requests()
      .iter()
      .filter(|r| r.key().url == target)
      .count()
  }
}

#[async_trait]
impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());
    let url = request.key().url;
    match self.routes.lock().unwrap().get(&url) {
      Some(Route::Respond(response)) => Ok(response.clone()),
      Some(Route::Fail) => Err(eyre!("offline: {}", url)),
      None => Err(eyre!("no route for {}", url)),
    }
  }
}

/// Host that only records what the agent asked for.
#[derive(Default)]
pub struct RecordingHost {
  skip_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl RecordingHost {
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn clients_claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

impl Host for RecordingHost {
  fn skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  fn claim_clients(&self) {
    self.claimed.store(true, Ordering::SeqCst);
  }
}

pub fn settings(manifest: ResourceManifest, core: &[&str]) -> AgentSettings {
  let core = CoreShell::new(core.iter().map(|s| s.to_string()).collect(), &manifest);
  AgentSettings {
    origin: Origin::parse(ORIGIN).unwrap(),
    manifest,
    core,
    caches: CacheNames::default(),
  }
}

/// Storage whose reads work but whose writes always fail.
#[derive(Default)]
pub struct ReadOnlyStorage(MemoryStorage);

impl ReadOnlyStorage {
  /// Seed an entry, bypassing the write failure.
  pub fn seed(&self, cache: &str, path: &str, response: Response) {
    self
      .0
      .put(cache, &RequestKey::get(&url_for(path)), &response)
      .unwrap();
  }
}

impl CacheStorage for ReadOnlyStorage {
  fn open(&self, cache: &str) -> Result<()> {
    self.0.open(cache)
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    self.0.has_cache(cache)
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    self.0.delete_cache(cache)
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    self.0.cache_names()
  }

  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    self.0.keys(cache)
  }

  fn get(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    self.0.get(cache, key)
  }

  fn put(&self, cache: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    Err(eyre!("disk full writing {}", cache))
  }

  fn put_all(&self, cache: &str, _entries: &[(RequestKey, Response)]) -> Result<()> {
    Err(eyre!("disk full writing {}", cache))
  }

  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    self.0.delete(cache, key)
  }
}

/// An agent wired to test doubles, with handles to each of them.
pub struct Fixture<S = MemoryStorage> {
  pub agent: Agent<S, StubFetcher, RecordingHost>,
  pub storage: Arc<S>,
  pub fetcher: Arc<StubFetcher>,
  pub host: Arc<RecordingHost>,
}

pub fn fixture(manifest: ResourceManifest, core: &[&str]) -> Fixture {
  fixture_with(Arc::new(MemoryStorage::new()), manifest, core)
}

/// Like `fixture`, over a storage backend of the caller's choosing.
pub fn fixture_with<S: CacheStorage>(
  storage: Arc<S>,
  manifest: ResourceManifest,
  core: &[&str],
) -> Fixture<S> {
  build(storage, Arc::new(StubFetcher::default()), manifest, core)
}

fn build<S: CacheStorage>(
  storage: Arc<S>,
  fetcher: Arc<StubFetcher>,
  manifest: ResourceManifest,
  core: &[&str],
) -> Fixture<S> {
  let host = Arc::new(RecordingHost::default());
  let agent = Agent::new(
    storage.clone(),
    fetcher.clone(),
    host.clone(),
    settings(manifest, core),
  );
  Fixture {
    agent,
    storage,
    fetcher,
    host,
  }
}

impl<S: CacheStorage> Fixture<S> {
  /// Agent for a later build sharing the same caches and network.
  pub fn next_build(&self, manifest: ResourceManifest, core: &[&str]) -> Fixture<S> {
    build(self.storage.clone(), self.fetcher.clone(), manifest, core)
  }

  /// Seed a cache entry directly.
  pub fn put(&self, cache: &str, path: &str, response: Response) {
    self
      .storage
      .put(cache, &RequestKey::get(&url_for(path)), &response)
      .unwrap();
  }

  pub fn body(&self, cache: &str, path: &str) -> Option<Vec<u8>> {
    self
      .storage
      .get(cache, &RequestKey::get(&url_for(path)))
      .unwrap()
      .map(|r| r.body)
  }

  /// Origin-relative paths in a cache, in insertion order.
  pub fn cached_paths(&self, cache: &str) -> Vec<String> {
    let origin = Origin::parse(ORIGIN).unwrap();
    self
      .storage
      .keys(cache)
      .unwrap()
      .into_iter()
      .filter_map(|k| origin.stored_key(&k.url))
      .collect()
  }
}
