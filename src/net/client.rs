//! Network seam used by the agent, and its reqwest implementation.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

use crate::config::HttpConfig;

use super::types::{CacheMode, Request, Response};

/// Performs network requests on behalf of the agent.
///
/// Only transport failures are errors. Any HTTP status, including 4xx and 5xx,
/// comes back as a `Response`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new(config: &HttpConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    if request.cache_mode == CacheMode::Reload {
      builder = builder
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::PRAGMA, "no-cache");
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request for {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(url = %request.url, status, bytes = body.len(), "Network fetch complete");

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
