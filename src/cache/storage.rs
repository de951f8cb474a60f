//! Cache storage trait plus SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::net::{RequestKey, Response};

/// Trait for named cache store backends.
///
/// A backend holds any number of named caches, each mapping a request identity
/// to a response snapshot. Every method is atomic on its own; callers take no
/// additional locks.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it doesn't exist yet.
  fn open(&self, cache: &str) -> Result<()>;

  /// Whether the named cache exists.
  fn has_cache(&self, cache: &str) -> Result<bool>;

  /// Delete a cache and all its entries. Returns false if it didn't exist.
  fn delete_cache(&self, cache: &str) -> Result<bool>;

  /// Names of all existing caches, sorted.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Request identities stored in a cache, in insertion order.
  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>>;

  /// Look up a stored response.
  fn get(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>>;

  /// Store a response, replacing any previous entry for the same request.
  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none.
  fn put_all(&self, cache: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Remove an entry. Returns false if it wasn't present.
  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached request; rowid preserves insertion order
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url, method)
);

CREATE INDEX IF NOT EXISTS idx_entries_cache ON entries(cache_name);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO entries (cache_name, url, method, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, datetime('now'))";

fn encode_headers(response: &Response) -> Result<String> {
  serde_json::to_string(&response.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![cache])
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    Ok(())
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![cache], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache, e))?;

    Ok(found.is_some())
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE cache_name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache, e))?;

    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url, method FROM entries WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![cache], |row| {
        Ok(RequestKey {
          url: row.get(0)?,
          method: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", cache, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", cache, e))?;

    Ok(keys)
  }

  fn get(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM entries
         WHERE cache_name = ? AND url = ? AND method = ?",
        params![cache, key.url, key.method],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, cache, e))?;

    match row {
      Some((status, headers, body)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key.url, e))?;
        Ok(Some(Response {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(cache, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, cache: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![cache])
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    for (key, response) in entries {
      let headers = encode_headers(response)?;
      // Replacing must move the row to the end of the insertion order
      tx.execute(
        "DELETE FROM entries WHERE cache_name = ? AND url = ? AND method = ?",
        params![cache, key.url, key.method],
      )
      .map_err(|e| eyre!("Failed to replace {}: {}", key.url, e))?;
      tx.execute(
        UPSERT_ENTRY,
        params![cache, key.url, key.method, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM entries WHERE cache_name = ? AND url = ? AND method = ?",
        params![cache, key.url, key.method],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", key.url, cache, e))?;

    Ok(removed > 0)
  }
}

/// Storage that keeps everything in process memory.
///
/// Useful as a test double and for throwaway runs. Counts writes so callers can
/// observe cache population.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<HashMap<String, Vec<(RequestKey, Response)>>>,
  writes: AtomicUsize,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of entries written through `put`/`put_all` so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<(RequestKey, Response)>>>> {
    self.caches.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, cache: &str) -> Result<()> {
    self.lock()?.entry(cache.to_string()).or_default();
    Ok(())
  }

  fn has_cache(&self, cache: &str) -> Result<bool> {
    Ok(self.lock()?.contains_key(cache))
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    Ok(self.lock()?.remove(cache).is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    Ok(
      self
        .lock()?
        .get(cache)
        .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn get(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    Ok(
      self
        .lock()?
        .get(cache)
        .and_then(|entries| entries.iter().find(|(k, _)| k == key))
        .map(|(_, response)| response.clone()),
    )
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(cache, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, cache: &str, new_entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut caches = self.lock()?;
    let entries = caches.entry(cache.to_string()).or_default();
    for (key, response) in new_entries {
      entries.retain(|(k, _)| k != key);
      entries.push((key.clone(), response.clone()));
    }
    self.writes.fetch_add(new_entries.len(), Ordering::SeqCst);
    Ok(())
  }

  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    let mut caches = self.lock()?;
    match caches.get_mut(cache) {
      Some(entries) => {
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() != before)
      }
      None => Ok(false),
    }
  }
}
