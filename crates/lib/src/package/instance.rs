//! The application instance document: the commit record tying an instance
//! version to the package versions it uses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::hash::Hashable;
use crate::version::RolloutVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationMode {
  #[default]
  SharedProcess,
  ExclusiveProcess,
}

impl ActivationMode {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "sharedprocess" => Some(Self::SharedProcess),
      "exclusiveprocess" => Some(Self::ExclusiveProcess),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DigestedInstanceSettings {
  Stateless {
    instance_count: i64,
  },
  Stateful {
    target_replica_set_size: u32,
    min_replica_set_size: u32,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedDefaultService {
  pub name: String,
  pub service_type_name: String,
  pub activation_mode: ActivationMode,
  pub service_dns_name: Option<String>,
  pub settings: DigestedInstanceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedServiceTemplate {
  pub service_type_name: String,
  pub activation_mode: ActivationMode,
  pub settings: DigestedInstanceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePackageRef {
  pub name: String,
  pub rollout_version: RolloutVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstance {
  pub application_id: String,
  pub application_type_name: String,
  pub application_type_version: String,
  pub name_uri: String,
  pub instance_version: u64,
  pub parameters: BTreeMap<String, String>,
  pub application_package_ref: RolloutVersion,
  pub service_package_refs: Vec<ServicePackageRef>,
  pub default_services: Vec<DigestedDefaultService>,
  pub service_templates: Vec<DigestedServiceTemplate>,
}

impl Hashable for ApplicationInstance {}

impl ApplicationInstance {
  pub fn service_package_version(&self, name: &str) -> Option<RolloutVersion> {
    self
      .service_package_refs
      .iter()
      .find(|r| r.name == name)
      .map(|r| r.rollout_version)
  }
}
