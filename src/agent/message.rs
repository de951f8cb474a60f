use color_eyre::{eyre::eyre, Result};
use std::str::FromStr;
use tracing::debug;

use crate::cache::CacheStorage;
use crate::host::Host;
use crate::net::Fetcher;

use super::Agent;

/// Control messages a page can post to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate immediately; the page reloads itself afterwards
  SkipWaiting,
  /// Fetch everything in the manifest that isn't cached yet
  DownloadOffline,
}

impl FromStr for ControlMessage {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "skipWaiting" => Ok(Self::SkipWaiting),
      "downloadOffline" => Ok(Self::DownloadOffline),
      other => Err(eyre!("Unknown control message: {}", other)),
    }
  }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
  SkippedWaiting,
  DownloadedOffline { fetched: usize },
  Ignored,
}

impl<S, F, H> Agent<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  /// Handle a message posted by a page. Unknown messages are ignored.
  pub async fn on_message(&self, data: &str) -> Result<MessageOutcome> {
    let Ok(message) = data.parse::<ControlMessage>() else {
      debug!(data, "Ignoring unrecognized message");
      return Ok(MessageOutcome::Ignored);
    };

    match message {
      ControlMessage::SkipWaiting => {
        self.host.skip_waiting();
        Ok(MessageOutcome::SkippedWaiting)
      }
      ControlMessage::DownloadOffline => {
        let fetched = self.download_offline().await?;
        Ok(MessageOutcome::DownloadedOffline { fetched })
      }
    }
  }
}
