//! Offline-first shell cache for a single-origin web application.
//!
//! An [`agent::Agent`] precaches the application shell on install, migrates
//! its caches against the resource manifest on activate, and answers requests
//! cache-first (online-first for the entry document). [`runtime::Runtime`]
//! plays the host's part when driving an agent locally.

pub mod agent;
pub mod cache;
pub mod config;
pub mod host;
pub mod manifest;
pub mod net;
pub mod runtime;

#[cfg(test)]
mod testing;
