mod checksum;
mod create;
mod delete;
mod provision;
mod show;
mod upgrade;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;

use pkgdigest_lib::builder::ApplicationBuilder;
use pkgdigest_lib::config::BuilderConfig;
use pkgdigest_lib::store::LocalStore;

pub use checksum::cmd_checksum;
pub use create::{CreateArgs, cmd_create};
pub use delete::cmd_delete;
pub use provision::cmd_provision;
pub use show::cmd_show;
pub use upgrade::{UpgradeArgs, cmd_upgrade};

/// Resolved store location and builder settings for one invocation.
pub struct Session {
  pub store_root: PathBuf,
  pub config: BuilderConfig,
}

impl Session {
  pub fn store(&self) -> Arc<LocalStore> {
    Arc::new(LocalStore::new(&self.store_root))
  }

  pub fn builder(&self) -> ApplicationBuilder<LocalStore> {
    ApplicationBuilder::new(self.store(), self.config.clone())
  }
}

pub fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}

/// Parse a `NAME=VALUE` parameter override.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
    _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_param_splits_on_first_equals() {
    assert_eq!(
      parse_param("Conn=a=b").unwrap(),
      ("Conn".to_string(), "a=b".to_string())
    );
    assert_eq!(parse_param("Empty=").unwrap(), ("Empty".to_string(), String::new()));
  }

  #[test]
  fn parse_param_rejects_missing_name() {
    assert!(parse_param("novalue").is_err());
    assert!(parse_param("=x").is_err());
  }
}
