use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use shellcache::agent::{Activation, MessageOutcome};
use shellcache::config::{self, Config};
use shellcache::net::Request;
use shellcache::runtime::{Runtime, UpdateOutcome};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first shell cache for single-origin web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin the application is served from
  #[arg(short, long, global = true)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current build and activate it
  Sync {
    /// Stage the build but leave it waiting
    #[arg(long)]
    install_only: bool,
  },
  /// Request a resource through the agent
  Fetch {
    /// Origin-relative path or absolute URL
    target: String,

    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Write the body here instead of stdout
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,
  },
  /// Post a control message (skipWaiting, downloadOffline)
  Message { data: String },
  /// Show the registration and cache contents
  Status,
}

/// Log to stderr, and to a file as well when a log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  // RUST_LOG overrides the default level
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config::APP_NAME));
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .with(filter)
    .init();

  guard
}

fn describe(activation: &Activation) -> String {
  match activation {
    Activation::Fresh { copied } => format!("activated fresh install ({} cached)", copied),
    Activation::Upgraded {
      evicted,
      retained,
      copied,
    } => format!(
      "upgraded ({} evicted, {} retained, {} refreshed)",
      evicted, retained, copied
    ),
    Activation::Reset { reason } => format!("activation failed, caches cleared: {}", reason),
  }
}

fn resolve_target(origin: &shellcache::agent::Origin, target: &str) -> Result<Url> {
  match Url::parse(target) {
    Ok(url) => Ok(url),
    Err(_) => origin.resolve(target),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    Config { origin, ..config }
  } else {
    config
  };

  let _guard = init_tracing(config.log_dir.as_deref());
  info!(origin = %config.origin, "Starting");

  let runtime = Runtime::open(&config)?;

  match args.command {
    Command::Sync { install_only } => match runtime.update(install_only).await? {
      UpdateOutcome::UpToDate => println!("up to date ({})", runtime.agent().version()),
      UpdateOutcome::Waiting => println!("installed, waiting ({})", runtime.agent().version()),
      UpdateOutcome::Activated(activation) => println!("{}", describe(&activation)),
    },
    Command::Fetch {
      target,
      method,
      output,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let url = resolve_target(runtime.agent().origin(), &target)?;

      let served = runtime.fetch(&Request::new(method, url)).await?;
      eprintln!("{} from {}", served.response.status, served.source);

      match output {
        Some(path) => std::fs::write(&path, &served.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => io::stdout()
          .write_all(&served.response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?,
      }
    }
    Command::Message { data } => {
      let delivery = runtime.post_message(&data).await?;
      match delivery.outcome {
        MessageOutcome::SkippedWaiting => println!("skip waiting requested"),
        MessageOutcome::DownloadedOffline { fetched } => {
          println!("downloaded {} resources for offline use", fetched)
        }
        MessageOutcome::Ignored => println!("message ignored"),
      }
      if let Some(activation) = delivery.promoted {
        println!("{}", describe(&activation));
      }
    }
    Command::Status => {
      let status = runtime.status()?;
      let reg = &status.registration;
      println!("build:    {}", status.version);
      println!(
        "active:   {}",
        reg.active_version.as_deref().unwrap_or("none")
      );
      println!(
        "waiting:  {}",
        reg.waiting_version.as_deref().unwrap_or("none")
      );
      println!(
        "offline:  {}/{} resources cached",
        status.cached_resources, status.total_resources
      );
      for (name, count) in &status.caches {
        println!("  {:<20} {} entries", name, count);
      }
    }
  }

  Ok(())
}
