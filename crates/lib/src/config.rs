//! Configuration injected into the builder.
//!
//! Settings are read through a [`ConfigProvider`] keyed by section and key.
//! [`EnvConfig`] maps `(section, key)` to `PKGDIGEST_<SECTION>_<KEY>`;
//! [`MapConfig`] holds values in memory.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{CONFIG_ENV_PREFIX, DEFAULT_TIMEOUT_SECS};
use crate::digest::DigestSettings;
use crate::package::Isolation;

pub const SECTION: &str = "builder";

pub trait ConfigProvider {
  fn setting(&self, section: &str, key: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
  pub fn variable_name(section: &str, key: &str) -> String {
    format!("{CONFIG_ENV_PREFIX}_{section}_{key}").to_ascii_uppercase()
  }
}

impl ConfigProvider for EnvConfig {
  fn setting(&self, section: &str, key: &str) -> Option<String> {
    std::env::var(Self::variable_name(section, key)).ok()
  }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfig {
  values: BTreeMap<(String, String), String>,
}

impl MapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
    self.values.insert((section.to_string(), key.to_string()), value.into());
    self
  }
}

impl ConfigProvider for MapConfig {
  fn setting(&self, section: &str, key: &str) -> Option<String> {
    self.values.get(&(section.to_string(), key.to_string())).cloned()
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value '{value}' for {section}.{key}: {reason}")]
  Invalid {
    section: String,
    key: String,
    value: String,
    reason: String,
  },
}

#[derive(Debug, Clone)]
pub struct BuilderConfig {
  /// Maximum number of concurrent store transfers.
  pub parallelism: usize,
  /// Deadline applied to a whole operation when the caller gives none.
  pub default_timeout: Duration,
  pub skip_checksum_validation: bool,
  pub default_isolation: Isolation,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
      skip_checksum_validation: false,
      default_isolation: Isolation::Process,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    section: SECTION.to_string(),
    key: key.to_string(),
    value: value.to_string(),
    reason: reason.into(),
  }
}

impl BuilderConfig {
  pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(raw) = provider.setting(SECTION, "parallelism") {
      config.parallelism = match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(invalid("parallelism", &raw, "expected a positive integer")),
      };
    }
    if let Some(raw) = provider.setting(SECTION, "timeout") {
      config.default_timeout =
        humantime::parse_duration(raw.trim()).map_err(|e| invalid("timeout", &raw, e.to_string()))?;
    }
    if let Some(raw) = provider.setting(SECTION, "skip_checksum_validation") {
      config.skip_checksum_validation = match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => return Err(invalid("skip_checksum_validation", &raw, "expected true or false")),
      };
    }
    if let Some(raw) = provider.setting(SECTION, "default_isolation") {
      config.default_isolation =
        Isolation::parse(raw.trim()).ok_or_else(|| invalid("default_isolation", &raw, "expected process or hyperv"))?;
    }

    Ok(config)
  }

  pub fn digest_settings(&self) -> DigestSettings {
    DigestSettings {
      default_isolation: self.default_isolation,
    }
  }
}
