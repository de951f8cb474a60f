//! Named response caches used by the agent.
//!
//! This module provides:
//! - `CacheStorage`: backend trait over any number of named caches
//! - `SqliteStorage` for persistent state, `MemoryStorage` for tests and throwaway runs
//! - `CacheHandle`: an opened cache, the unit the agent works with
//! - `Served`/`ServedFrom`: where a response handed to a page came from

mod storage;
mod store;
mod traits;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::{CacheHandle, CacheNames};
pub use traits::{Served, ServedFrom};
