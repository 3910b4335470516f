//! Service manifest descriptor.

use serde::{Deserialize, Serialize};

use super::application::{Diagnostics, EnvironmentVariable};
use crate::params::{ParameterError, ParameterTable, ResolveParams, resolve_fields};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifestDescriptor {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub service_types: Vec<ServiceTypeDecl>,
  #[serde(default)]
  pub code_packages: Vec<CodePackageDecl>,
  #[serde(default)]
  pub config_packages: Vec<SubPackageDecl>,
  #[serde(default)]
  pub data_packages: Vec<SubPackageDecl>,
  #[serde(default)]
  pub resources: Resources,
  #[serde(default)]
  pub diagnostics: Option<Diagnostics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceKind {
  #[default]
  Stateless,
  Stateful {
    #[serde(default)]
    has_persisted_state: bool,
  },
}

/// Relative importance of a load metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricWeight {
  Zero,
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMetric {
  pub name: String,
  #[serde(default)]
  pub primary_default_load: u32,
  #[serde(default)]
  pub secondary_default_load: u32,
  #[serde(default)]
  pub weight: Option<MetricWeight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
  pub service_type_name: String,
  #[serde(default)]
  pub kind: ServiceKind,
  #[serde(default)]
  pub placement_constraints: Option<String>,
  #[serde(default)]
  pub load_metrics: Vec<LoadMetric>,
}

resolve_fields!(ServiceType { placement_constraints });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroupMember {
  pub service_type_name: String,
  #[serde(default)]
  pub load_metrics: Vec<LoadMetric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroupType {
  pub service_group_type_name: String,
  #[serde(default)]
  pub kind: ServiceKind,
  #[serde(default)]
  pub placement_constraints: Option<String>,
  #[serde(default)]
  pub load_metrics: Vec<LoadMetric>,
  #[serde(default)]
  pub members: Vec<ServiceGroupMember>,
}

resolve_fields!(ServiceGroupType { placement_constraints });

/// A declared service type: either a single service or a group of members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum ServiceTypeDecl {
  Single(ServiceType),
  Group(ServiceGroupType),
}

impl ServiceTypeDecl {
  pub fn name(&self) -> &str {
    match self {
      ServiceTypeDecl::Single(t) => &t.service_type_name,
      ServiceTypeDecl::Group(g) => &g.service_group_type_name,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExeHost {
  pub program: String,
  pub arguments: Option<String>,
  pub working_folder: Option<String>,
}

resolve_fields!(ExeHost { program, arguments, working_folder });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerHost {
  pub image_name: String,
  pub commands: Option<String>,
  pub entry_point: Option<String>,
  pub from_source: Option<String>,
}

resolve_fields!(ContainerHost { image_name, commands, entry_point, from_source });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "host")]
pub enum EntryPoint {
  Exe(ExeHost),
  Container(ContainerHost),
}

impl ResolveParams for EntryPoint {
  fn resolve_params(&mut self, table: &ParameterTable) -> Result<(), ParameterError> {
    match self {
      EntryPoint::Exe(host) => host.resolve_params(table),
      EntryPoint::Container(host) => host.resolve_params(table),
    }
  }
}

impl Default for EntryPoint {
  fn default() -> Self {
    EntryPoint::Exe(ExeHost::default())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePackageDecl {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub is_activator: bool,
  #[serde(default)]
  pub setup_entry_point: Option<ExeHost>,
  #[serde(default)]
  pub entry_point: EntryPoint,
  #[serde(default)]
  pub environment_variables: Vec<EnvironmentVariable>,
}

resolve_fields!(CodePackageDecl {
  setup_entry_point,
  entry_point,
  environment_variables,
});

impl CodePackageDecl {
  pub fn container(&self) -> Option<&ContainerHost> {
    match &self.entry_point {
      EntryPoint::Container(host) => Some(host),
      EntryPoint::Exe(_) => None,
    }
  }

  pub fn is_container_hosted(&self) -> bool {
    self.container().is_some()
  }
}

/// A config or data package declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPackageDecl {
  pub name: String,
  pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
  Http,
  Https,
  Tcp,
  Udp,
}

impl Protocol {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "http" => Some(Self::Http),
      "https" => Some(Self::Https),
      "tcp" => Some(Self::Tcp),
      "udp" => Some(Self::Udp),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EndpointType {
  #[default]
  Internal,
  Input,
}

impl EndpointType {
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "input" => Some(Self::Input),
      "internal" => Some(Self::Internal),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDecl {
  pub name: String,
  #[serde(default)]
  pub protocol: Option<Protocol>,
  #[serde(default)]
  pub port: Option<u32>,
  #[serde(default, rename = "type")]
  pub endpoint_type: EndpointType,
  #[serde(default)]
  pub uri_scheme: Option<String>,
  #[serde(default)]
  pub path_suffix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
  #[serde(default)]
  pub endpoints: Vec<EndpointDecl>,
}
