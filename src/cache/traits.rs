//! Result types describing where a served response came from.

use crate::net::Response;

/// A response handed back to a controlled page, with its origin.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ServedFrom,
}

impl Served {
  /// Fresh data from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
    }
  }

  /// Data found in the content cache.
  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Cache,
    }
  }

  /// Cached data served because the network was unavailable.
  pub fn offline(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::CacheFallback,
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh data from network
  Network,
  /// Cache hit on a cache-first resource
  Cache,
  /// Network failed, serving the cached copy of an online-first resource
  CacheFallback,
}

impl std::fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::CacheFallback => "cache (offline fallback)",
    };
    f.write_str(label)
  }
}
