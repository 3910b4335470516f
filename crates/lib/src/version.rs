//! Rollout versions.
//!
//! A rollout version is a `(major, minor)` pair naming one physically
//! distinct, immutable published artifact. Major bumps mark structurally
//! significant changes; minor bumps mark content-only changes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RolloutVersion {
  pub major: u64,
  pub minor: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rollout version '{0}': expected <major>.<minor>")]
pub struct ParseVersionError(pub String);

impl RolloutVersion {
  pub const fn new(major: u64, minor: u64) -> Self {
    Self { major, minor }
  }

  /// The version stamped on every entity of the tree built for application instance `instance`.
  pub const fn for_instance(instance: u64) -> Self {
    Self::new(instance, 0)
  }

  pub const fn next_major(self) -> Self {
    Self::new(self.major.saturating_add(1), 0)
  }

  pub const fn next_minor(self) -> Self {
    Self::new(self.major, self.minor.saturating_add(1))
  }
}

impl fmt::Display for RolloutVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

impl FromStr for RolloutVersion {
  type Err = ParseVersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || ParseVersionError(s.to_string());
    let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
    Ok(Self::new(
      major.parse().map_err(|_| err())?,
      minor.parse().map_err(|_| err())?,
    ))
  }
}

impl Serialize for RolloutVersion {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for RolloutVersion {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
