//! Network types and the fetcher seam.

mod client;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{CacheMode, Request, RequestKey, Response};
