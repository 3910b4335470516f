mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pkgdigest_lib::config::{BuilderConfig, EnvConfig};
use pkgdigest_lib::store::resolve_store_root;

use cmd::{Session, parse_param};
use output::OutputFormat;

/// pkgd - digest application packages and publish versioned upgrades
#[derive(Parser)]
#[command(name = "pkgd")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Store root directory (default: $PKGDIGEST_STORE)
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  /// Maximum number of concurrent store transfers
  #[arg(long, global = true)]
  parallelism: Option<usize>,

  /// Deadline for the whole operation, e.g. "90s" or "10m"
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Upload local content even when a version was reused with different content
  #[arg(long, global = true)]
  skip_checksum_validation: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Checksum a local build layout and publish it as an application type
  Provision {
    /// Build layout root holding ApplicationManifest.json
    build_dir: PathBuf,
  },

  /// Create an application from a provisioned type
  Create {
    /// Application type name
    #[arg(long = "type")]
    application_type: String,

    /// Application type version
    #[arg(long = "type-version")]
    type_version: String,

    /// Application id
    #[arg(long = "app")]
    application_id: String,

    /// Application name URI (default: app:/<app>)
    #[arg(long)]
    name_uri: Option<String>,

    /// Application parameter override, NAME=VALUE
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },

  /// Upgrade a running application to another type version
  Upgrade {
    #[arg(long = "type")]
    application_type: String,

    #[arg(long = "app")]
    application_id: String,

    /// Instance version currently running
    #[arg(long)]
    from: u64,

    /// Target application type version
    #[arg(long)]
    to: String,

    /// Application parameter override, NAME=VALUE
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },

  /// Show an application instance and its package versions
  Show {
    #[arg(long = "type")]
    application_type: String,

    #[arg(long = "app")]
    application_id: String,

    /// Instance version to show
    #[arg(long)]
    instance: u64,
  },

  /// Print the content checksum of a local file or folder
  Checksum {
    path: PathBuf,

    /// Compare with the witness recorded for this store path
    #[arg(long)]
    against: Option<String>,
  },

  /// Delete every document of an application
  Delete {
    #[arg(long = "type")]
    application_type: String,

    #[arg(long = "app")]
    application_id: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let output = cli.output;

  if let Commands::Checksum { path, against } = &cli.command
    && against.is_none()
  {
    return cmd::cmd_checksum(None, path, None, output);
  }

  let session = session(&cli)?;
  match cli.command {
    Commands::Provision { build_dir } => cmd::cmd_provision(&session, build_dir, output),
    Commands::Create {
      application_type,
      type_version,
      application_id,
      name_uri,
      params,
    } => cmd::cmd_create(
      &session,
      cmd::CreateArgs {
        application_type,
        type_version,
        application_id,
        name_uri,
        params,
      },
      output,
    ),
    Commands::Upgrade {
      application_type,
      application_id,
      from,
      to,
      params,
    } => cmd::cmd_upgrade(
      &session,
      cmd::UpgradeArgs {
        application_type,
        application_id,
        from,
        to,
        params,
      },
      output,
    ),
    Commands::Show {
      application_type,
      application_id,
      instance,
    } => cmd::cmd_show(&session, &application_type, &application_id, instance, output),
    Commands::Checksum { path, against } => cmd::cmd_checksum(Some(&session), &path, against.as_deref(), output),
    Commands::Delete {
      application_type,
      application_id,
      force,
    } => cmd::cmd_delete(&session, &application_type, &application_id, force),
  }
}

fn session(cli: &Cli) -> Result<Session> {
  let store_root = resolve_store_root(cli.store.clone())
    .context("No store configured. Pass --store or set PKGDIGEST_STORE.")?;

  let mut config = BuilderConfig::from_provider(&EnvConfig).context("Invalid builder configuration")?;
  if let Some(parallelism) = cli.parallelism {
    config.parallelism = parallelism.max(1);
  }
  if let Some(timeout) = cli.timeout {
    config.default_timeout = timeout;
  }
  if cli.skip_checksum_validation {
    config.skip_checksum_validation = true;
  }

  debug!(
    store = %store_root.display(),
    parallelism = config.parallelism,
    timeout = ?config.default_timeout,
    skip_checksum_validation = config.skip_checksum_validation,
    "session resolved"
  );
  Ok(Session { store_root, config })
}
