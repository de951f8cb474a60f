//! Host runtime seam and the local registration record.
//!
//! The agent only ever asks its host for two things: skip the waiting phase
//! and take control of open pages. `LocalHost` answers those by updating a
//! registration record persisted next to the cache database.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// What the agent can ask of the runtime hosting it.
pub trait Host: Send + Sync {
  /// Promote the installed agent without waiting for old pages to close.
  fn skip_waiting(&self);

  /// Take control of every open page immediately.
  fn claim_clients(&self);
}

/// Persisted lifecycle state of the agent for one origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
  /// Version currently controlling pages
  pub active_version: Option<String>,
  /// Installed version waiting to be activated
  pub waiting_version: Option<String>,
  /// Set by the agent, consumed when the waiting version is promoted
  pub skip_waiting: bool,
  /// Whether the active version has claimed open pages
  pub clients_claimed: bool,
  pub installed_at: Option<DateTime<Utc>>,
  pub activated_at: Option<DateTime<Utc>>,
}

impl Registration {
  pub fn is_active(&self, version: &str) -> bool {
    self.active_version.as_deref() == Some(version)
  }

  pub fn is_waiting(&self, version: &str) -> bool {
    self.waiting_version.as_deref() == Some(version)
  }
}

/// Host backed by a JSON registration file.
pub struct LocalHost {
  path: Option<PathBuf>,
  state: Mutex<Registration>,
}

impl LocalHost {
  /// Load the registration at `path`, starting empty if there is none.
  pub fn load(path: PathBuf) -> Result<Self> {
    let state = if path.exists() {
      let contents = std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read registration {}: {}", path.display(), e))?;
      serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse registration {}: {}", path.display(), e))?
    } else {
      Registration::default()
    };

    Ok(Self {
      path: Some(path),
      state: Mutex::new(state),
    })
  }

  /// Host that never touches the filesystem.
  pub fn in_memory() -> Self {
    Self {
      path: None,
      state: Mutex::new(Registration::default()),
    }
  }

  pub fn registration(&self) -> Registration {
    self.lock().clone()
  }

  /// Apply a change to the registration and persist it.
  pub fn update<F: FnOnce(&mut Registration)>(&self, f: F) -> Result<()> {
    let snapshot = {
      let mut state = self.lock();
      f(&mut state);
      state.clone()
    };
    self.save(&snapshot)
  }

  fn save(&self, registration: &Registration) -> Result<()> {
    let Some(ref path) = self.path else {
      return Ok(());
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
    }
    let contents = serde_json::to_string_pretty(registration)
      .map_err(|e| eyre!("Failed to serialize registration: {}", e))?;
    std::fs::write(path, contents)
      .map_err(|e| eyre!("Failed to write registration {}: {}", path.display(), e))?;
    Ok(())
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Registration> {
    // Every mutation is a plain field assignment, so a poisoned lock is still consistent
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Host for LocalHost {
  fn skip_waiting(&self) {
    debug!("Agent requested skip waiting");
    self.lock().skip_waiting = true;
  }

  fn claim_clients(&self) {
    debug!("Agent claimed clients");
    self.lock().clients_claimed = true;
  }
}
