//! Application type manifest descriptor.

use serde::{Deserialize, Serialize};

use super::policy::{ApplicationPolicies, ImportPolicy};
use crate::params::resolve_fields;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationTypeDescriptor {
  pub type_name: String,
  pub type_version: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub parameters: Vec<ParameterDecl>,
  #[serde(default)]
  pub service_manifest_imports: Vec<ServiceManifestImport>,
  #[serde(default)]
  pub principals: Principals,
  #[serde(default)]
  pub policies: ApplicationPolicies,
  #[serde(default)]
  pub certificates: Certificates,
  #[serde(default)]
  pub diagnostics: Option<Diagnostics>,
  #[serde(default)]
  pub default_services: Vec<DefaultService>,
  #[serde(default)]
  pub service_templates: Vec<ServiceTemplate>,
}

/// A declared application parameter and its default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDecl {
  pub name: String,
  #[serde(default)]
  pub default_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
  pub name: String,
  pub version: String,
}

/// One imported service manifest plus the policies scoped to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManifestImport {
  pub service_manifest_ref: ManifestRef,
  #[serde(default)]
  pub policies: Vec<ImportPolicy>,
  #[serde(default)]
  pub config_overrides: Vec<ConfigOverride>,
  #[serde(default)]
  pub resource_overrides: ResourceOverrides,
  #[serde(default)]
  pub environment_overrides: Vec<EnvironmentOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParameter {
  pub name: String,
  pub value: String,
  #[serde(default)]
  pub is_encrypted: Option<String>,
}

resolve_fields!(ConfigParameter { value, is_encrypted });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSection {
  pub name: String,
  #[serde(default)]
  pub parameters: Vec<ConfigParameter>,
}

resolve_fields!(ConfigSection { parameters });

/// Settings replacing values of the config package with the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverride {
  pub name: String,
  #[serde(default)]
  pub sections: Vec<ConfigSection>,
}

resolve_fields!(ConfigOverride { sections });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverrides {
  #[serde(default)]
  pub endpoints: Vec<EndpointOverride>,
}

/// Replaces fields of a declared endpoint; only fields present are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOverride {
  pub name: String,
  pub protocol: Option<String>,
  pub port: Option<String>,
  #[serde(rename = "type")]
  pub endpoint_type: Option<String>,
  pub uri_scheme: Option<String>,
  pub path_suffix: Option<String>,
}

resolve_fields!(EndpointOverride {
  protocol,
  port,
  endpoint_type,
  uri_scheme,
  path_suffix,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
  pub name: String,
  #[serde(default)]
  pub value: String,
  #[serde(default, rename = "type")]
  pub variable_type: Option<String>,
}

resolve_fields!(EnvironmentVariable { value, variable_type });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentOverrides {
  pub code_package_ref: String,
  #[serde(default)]
  pub variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Principals {
  pub users: Vec<UserPrincipal>,
  pub groups: Vec<GroupPrincipal>,
}

resolve_fields!(Principals { users, groups });

impl Principals {
  pub fn contains(&self, name: &str) -> bool {
    self.users.iter().any(|u| u.name == name) || self.groups.iter().any(|g| g.name == name)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPrincipal {
  pub name: String,
  pub account_type: Option<String>,
  pub account_name: Option<String>,
  pub password: Option<String>,
  pub member_of: Vec<String>,
}

resolve_fields!(UserPrincipal { account_type, account_name, password });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupPrincipal {
  pub name: String,
  pub domain_group: Option<String>,
}

resolve_fields!(GroupPrincipal { domain_group });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRef {
  pub name: String,
  pub x509_find_value: String,
  #[serde(default)]
  pub x509_find_type: Option<String>,
  #[serde(default)]
  pub x509_store_name: Option<String>,
}

resolve_fields!(CertificateRef { x509_find_value, x509_find_type, x509_store_name });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Certificates {
  pub secrets: Vec<CertificateRef>,
  pub endpoint: Vec<CertificateRef>,
}

resolve_fields!(Certificates { secrets, endpoint });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostics {
  pub crash_dump_folder: Option<String>,
  pub etw_providers: Vec<String>,
  pub log_folders: Vec<String>,
}

resolve_fields!(Diagnostics { crash_dump_folder, log_folders });

/// Scalar settings shared by default services and service templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ServiceInstanceSettings {
  Stateless {
    instance_count: String,
  },
  Stateful {
    target_replica_set_size: String,
    min_replica_set_size: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultService {
  pub name: String,
  pub service_type_name: String,
  #[serde(default)]
  pub service_package_activation_mode: Option<String>,
  #[serde(default)]
  pub service_dns_name: Option<String>,
  pub settings: ServiceInstanceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplate {
  pub service_type_name: String,
  #[serde(default)]
  pub service_package_activation_mode: Option<String>,
  pub settings: ServiceInstanceSettings,
}
