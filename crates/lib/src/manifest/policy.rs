//! Policy declarations attached to a service manifest import or to the
//! application as a whole.
//!
//! Scalar fields that may carry a parameter reference are kept as strings
//! here and typed during digestion.

use serde::{Deserialize, Serialize};

use crate::params::resolve_fields;

/// Entry point a run-as or debug setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum EntryPointKind {
  #[default]
  Main,
  Setup,
  All,
}

impl EntryPointKind {
  /// Case-insensitive parse; `None` for unknown values.
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "main" => Some(Self::Main),
      "setup" => Some(Self::Setup),
      "all" => Some(Self::All),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRunAs {
  pub user_ref: String,
}

resolve_fields!(DefaultRunAs { user_ref });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAsPolicy {
  pub code_package_ref: String,
  pub user_ref: String,
  #[serde(default)]
  pub entry_point_type: Option<String>,
}

resolve_fields!(RunAsPolicy { user_ref, entry_point_type });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAccessPolicy {
  pub resource_ref: String,
  pub principal_ref: String,
  #[serde(default = "default_rights")]
  pub rights: String,
  #[serde(default = "default_resource_type")]
  pub resource_type: String,
}

fn default_rights() -> String {
  "Read".to_string()
}

fn default_resource_type() -> String {
  "Endpoint".to_string()
}

resolve_fields!(SecurityAccessPolicy { principal_ref, rights });

impl SecurityAccessPolicy {
  pub fn is_endpoint(&self) -> bool {
    self.resource_type.eq_ignore_ascii_case("endpoint")
  }
}

/// Marks packages as shared between service package instances.
///
/// Either names a package directly or applies to every package of a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSharingPolicy {
  #[serde(default)]
  pub package_ref: Option<String>,
  #[serde(default)]
  pub scope: Option<String>,
}

resolve_fields!(PackageSharingPolicy { scope });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointBindingPolicy {
  pub endpoint_ref: String,
  pub certificate_ref: String,
}

resolve_fields!(EndpointBindingPolicy { endpoint_ref, certificate_ref });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGovernancePolicy {
  pub code_package_ref: String,
  pub memory_in_mb: Option<String>,
  pub memory_swap_in_mb: Option<String>,
  pub cpu_shares: Option<String>,
  pub cpu_percent: Option<String>,
  pub maximum_iops: Option<String>,
}

resolve_fields!(ResourceGovernancePolicy {
  memory_in_mb,
  memory_swap_in_mb,
  cpu_shares,
  cpu_percent,
  maximum_iops,
});

impl ResourceGovernancePolicy {
  /// Numeric fields with their names, for validation after resolution.
  pub fn numeric_fields(&self) -> [(&'static str, &Option<String>); 5] {
    [
      ("memory_in_mb", &self.memory_in_mb),
      ("memory_swap_in_mb", &self.memory_swap_in_mb),
      ("cpu_shares", &self.cpu_shares),
      ("cpu_percent", &self.cpu_percent),
      ("maximum_iops", &self.maximum_iops),
    ]
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePackageResourceGovernancePolicy {
  pub cpu_cores: Option<String>,
  pub memory_in_mb: Option<String>,
}

resolve_fields!(ServicePackageResourceGovernancePolicy { cpu_cores, memory_in_mb });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryCredentials {
  pub account_name: String,
  pub password: Option<String>,
  pub password_encrypted: Option<String>,
  #[serde(rename = "type")]
  pub credential_type: Option<String>,
  pub email: Option<String>,
}

resolve_fields!(RepositoryCredentials {
  account_name,
  password,
  password_encrypted,
  credential_type,
  email,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
  pub container_port: String,
  pub endpoint_ref: String,
}

resolve_fields!(PortBinding { container_port });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLabel {
  pub name: String,
  pub value: String,
}

resolve_fields!(ContainerLabel { value });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerHostPolicy {
  pub code_package_ref: String,
  pub isolation: Option<String>,
  pub use_default_repository_credentials: Option<String>,
  pub use_token_authentication_credentials: Option<String>,
  pub run_interactive: Option<String>,
  pub containers_retention_count: Option<String>,
  pub auto_remove: Option<String>,
  pub repository_credentials: Option<RepositoryCredentials>,
  pub port_bindings: Vec<PortBinding>,
  pub labels: Vec<ContainerLabel>,
}

resolve_fields!(ContainerHostPolicy {
  isolation,
  use_default_repository_credentials,
  use_token_authentication_credentials,
  run_interactive,
  containers_retention_count,
  auto_remove,
  repository_credentials,
  port_bindings,
  labels,
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePackageContainerPolicy {
  pub isolation: Option<String>,
  pub hostname: Option<String>,
  pub port_bindings: Vec<PortBinding>,
}

resolve_fields!(ServicePackageContainerPolicy { isolation, hostname, port_bindings });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerNetworkPolicy {
  pub network_ref: String,
  #[serde(default)]
  pub endpoint_bindings: Vec<String>,
}

resolve_fields!(ContainerNetworkPolicy { network_ref });

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicies {
  pub container_network_policies: Vec<ContainerNetworkPolicy>,
}

resolve_fields!(NetworkPolicies { container_network_policies });

/// One policy entry of a service manifest import, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ImportPolicy {
  RunAs(RunAsPolicy),
  SecurityAccess(SecurityAccessPolicy),
  PackageSharing(PackageSharingPolicy),
  EndpointBinding(EndpointBindingPolicy),
  ResourceGovernance(ResourceGovernancePolicy),
  ServicePackageResourceGovernance(ServicePackageResourceGovernancePolicy),
  ContainerHost(ContainerHostPolicy),
  ServicePackageContainer(ServicePackageContainerPolicy),
  Network(NetworkPolicies),
}

/// Application-wide policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationPolicies {
  pub default_run_as: Option<DefaultRunAs>,
  pub security_access: Vec<SecurityAccessPolicy>,
}

resolve_fields!(ApplicationPolicies { default_run_as, security_access });

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn import_policies_are_tagged_by_kind() {
    let json = r#"[
      {"kind": "RunAs", "code_package_ref": "Code", "user_ref": "Admin", "entry_point_type": "Setup"},
      {"kind": "PackageSharing", "scope": "All"},
      {"kind": "EndpointBinding", "endpoint_ref": "Web", "certificate_ref": "Tls"}
    ]"#;
    let policies: Vec<ImportPolicy> = serde_json::from_str(json).unwrap();
    assert_eq!(policies.len(), 3);
    assert!(matches!(&policies[0], ImportPolicy::RunAs(p) if p.entry_point_type.as_deref() == Some("Setup")));
    assert!(matches!(&policies[1], ImportPolicy::PackageSharing(p) if p.package_ref.is_none()));
    assert!(matches!(&policies[2], ImportPolicy::EndpointBinding(p) if p.endpoint_ref == "Web"));
  }

  #[test]
  fn security_access_defaults() {
    let policy: SecurityAccessPolicy =
      serde_json::from_str(r#"{"resource_ref": "Web", "principal_ref": "Users"}"#).unwrap();
    assert_eq!(policy.rights, "Read");
    assert!(policy.is_endpoint());
  }

  #[test]
  fn entry_point_kind_parses_case_insensitively() {
    assert_eq!(EntryPointKind::parse("SETUP"), Some(EntryPointKind::Setup));
    assert_eq!(EntryPointKind::parse("all"), Some(EntryPointKind::All));
    assert_eq!(EntryPointKind::parse("Other"), None);
  }
}
