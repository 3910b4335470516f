//! Digested package documents.
//!
//! A digested tree is one [`ApplicationPackage`] plus one [`ServicePackage`]
//! per imported service manifest. Every independently versioned block
//! carries its own [`RolloutVersion`].
//!
//! Checksums and versions are assigned in two explicit phases through the
//! [`Digested`] trait: `compute_checksum` hashes the document with every
//! rollout version and its own checksum cleared, then `stamp` writes the
//! versions. Two digests that differ only in assigned version therefore
//! produce the same checksum.

mod instance;

use serde::{Deserialize, Serialize};

pub use instance::*;

use crate::manifest::{
  ApplicationPolicies, CertificateRef, CodePackageDecl, ConfigOverride, Diagnostics, EndpointBindingPolicy,
  EndpointDecl, EntryPointKind, LoadMetric, NetworkPolicies, Principals, RepositoryCredentials,
  ResourceGovernancePolicy, SecurityAccessPolicy, ServiceKind, ServicePackageResourceGovernancePolicy,
  SubPackageDecl,
};
use crate::params::DebugParameters;
use crate::util::hash::{ContentHash, HashError, Hashable};
use crate::version::RolloutVersion;

/// Two-phase checksum and version assignment.
pub trait Digested: Hashable + Clone {
  /// Clear every rollout version field and the document's own checksum.
  fn clear_versions(&mut self);

  /// Write `version` into every rollout version field.
  fn stamp(&mut self, version: RolloutVersion);

  /// Checksum of the canonical, version-free form of the document.
  fn compute_checksum(&self) -> Result<ContentHash, HashError> {
    let mut unversioned = self.clone();
    unversioned.clear_versions();
    unversioned.canonical_hash()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedEnvironment {
  pub principals: Principals,
  pub policies: ApplicationPolicies,
  pub diagnostics: Option<Diagnostics>,
  pub rollout_version: Option<RolloutVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedCertificates {
  pub secrets: Vec<CertificateRef>,
  pub endpoint: Vec<CertificateRef>,
  pub rollout_version: Option<RolloutVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPackage {
  pub application_type_name: String,
  pub application_id: String,
  pub name_uri: String,
  pub rollout_version: Option<RolloutVersion>,
  pub content_checksum: Option<ContentHash>,
  pub digested_environment: DigestedEnvironment,
  pub digested_certificates: DigestedCertificates,
}

impl Hashable for ApplicationPackage {}

impl Digested for ApplicationPackage {
  fn clear_versions(&mut self) {
    self.rollout_version = None;
    self.content_checksum = None;
    self.digested_environment.rollout_version = None;
    self.digested_certificates.rollout_version = None;
  }

  fn stamp(&mut self, version: RolloutVersion) {
    self.rollout_version = Some(version);
    self.digested_environment.rollout_version = Some(version);
    self.digested_certificates.rollout_version = Some(version);
  }
}

/// A service type after group flattening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedServiceType {
  pub service_type_name: String,
  pub kind: ServiceKind,
  pub placement_constraints: Option<String>,
  pub load_metrics: Vec<LoadMetric>,
  /// Member type names when this entry was flattened from a service group.
  pub group_members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedServiceTypes {
  pub service_types: Vec<DigestedServiceType>,
  pub rollout_version: Option<RolloutVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAsAttachment {
  pub user_ref: String,
  pub entry_point: EntryPointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
  Process,
  Hyperv,
}

impl Isolation {
  /// Case-insensitive parse of an explicit isolation mode.
  pub fn parse(value: &str) -> Option<Self> {
    match value.to_ascii_lowercase().as_str() {
      "process" => Some(Self::Process),
      "hyperv" => Some(Self::Hyperv),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedPortBinding {
  pub container_port: u32,
  pub endpoint_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedContainerHostPolicy {
  pub isolation: Isolation,
  pub use_default_repository_credentials: bool,
  pub use_token_authentication_credentials: bool,
  pub run_interactive: bool,
  pub containers_retention_count: i64,
  pub auto_remove: bool,
  pub repository_credentials: Option<RepositoryCredentials>,
  pub port_bindings: Vec<DigestedPortBinding>,
  pub labels: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedServicePackageContainerPolicy {
  pub isolation: Isolation,
  pub hostname: Option<String>,
  pub port_bindings: Vec<DigestedPortBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedCodePackage {
  pub code_package: CodePackageDecl,
  pub rollout_version: Option<RolloutVersion>,
  pub content_checksum: Option<ContentHash>,
  pub is_shared: bool,
  pub run_as_policies: Vec<RunAsAttachment>,
  pub resource_governance: Option<ResourceGovernancePolicy>,
  pub container_host_policy: Option<DigestedContainerHostPolicy>,
  pub debug_parameters: Option<DebugParameters>,
}

impl DigestedCodePackage {
  pub fn name(&self) -> &str {
    &self.code_package.name
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedConfigPackage {
  pub config_package: SubPackageDecl,
  pub rollout_version: Option<RolloutVersion>,
  pub content_checksum: Option<ContentHash>,
  pub is_shared: bool,
  pub config_override: Option<ConfigOverride>,
  pub debug_parameters: Option<DebugParameters>,
}

impl DigestedConfigPackage {
  pub fn name(&self) -> &str {
    &self.config_package.name
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedDataPackage {
  pub data_package: SubPackageDecl,
  pub rollout_version: Option<RolloutVersion>,
  pub content_checksum: Option<ContentHash>,
  pub is_shared: bool,
  pub debug_parameters: Option<DebugParameters>,
}

impl DigestedDataPackage {
  pub fn name(&self) -> &str {
    &self.data_package.name
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedEndpoint {
  pub endpoint: EndpointDecl,
  pub security_access_policy: Option<SecurityAccessPolicy>,
  pub endpoint_binding_policy: Option<EndpointBindingPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedResources {
  pub endpoints: Vec<DigestedEndpoint>,
  pub certificates: Vec<CertificateRef>,
  pub rollout_version: Option<RolloutVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePackage {
  pub name: String,
  pub manifest_version: String,
  pub manifest_checksum: Option<ContentHash>,
  pub description: Option<String>,
  pub rollout_version: Option<RolloutVersion>,
  pub content_checksum: Option<ContentHash>,
  pub resource_governance: Option<ServicePackageResourceGovernancePolicy>,
  pub container_policy: Option<DigestedServicePackageContainerPolicy>,
  pub network_policies: Option<NetworkPolicies>,
  pub digested_service_types: DigestedServiceTypes,
  pub digested_code_packages: Vec<DigestedCodePackage>,
  pub digested_config_packages: Vec<DigestedConfigPackage>,
  pub digested_data_packages: Vec<DigestedDataPackage>,
  pub digested_resources: DigestedResources,
  pub diagnostics: Option<Diagnostics>,
}

impl ServicePackage {
  pub fn code_package(&self, name: &str) -> Option<&DigestedCodePackage> {
    self.digested_code_packages.iter().find(|p| p.name() == name)
  }

  pub fn config_package(&self, name: &str) -> Option<&DigestedConfigPackage> {
    self.digested_config_packages.iter().find(|p| p.name() == name)
  }

  pub fn data_package(&self, name: &str) -> Option<&DigestedDataPackage> {
    self.digested_data_packages.iter().find(|p| p.name() == name)
  }

  pub fn container_code_package_count(&self) -> usize {
    self
      .digested_code_packages
      .iter()
      .filter(|p| p.code_package.is_container_hosted())
      .count()
  }
}

impl Hashable for ServicePackage {}

impl Digested for ServicePackage {
  fn clear_versions(&mut self) {
    self.rollout_version = None;
    self.content_checksum = None;
    self.digested_service_types.rollout_version = None;
    self.digested_resources.rollout_version = None;
    for p in &mut self.digested_code_packages {
      p.rollout_version = None;
    }
    for p in &mut self.digested_config_packages {
      p.rollout_version = None;
    }
    for p in &mut self.digested_data_packages {
      p.rollout_version = None;
    }
  }

  fn stamp(&mut self, version: RolloutVersion) {
    self.rollout_version = Some(version);
    self.digested_service_types.rollout_version = Some(version);
    self.digested_resources.rollout_version = Some(version);
    for p in &mut self.digested_code_packages {
      p.rollout_version = Some(version);
    }
    for p in &mut self.digested_config_packages {
      p.rollout_version = Some(version);
    }
    for p in &mut self.digested_data_packages {
      p.rollout_version = Some(version);
    }
  }
}

/// A complete digested package tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestedTree {
  pub application: ApplicationPackage,
  pub services: Vec<ServicePackage>,
}

impl DigestedTree {
  pub fn service(&self, name: &str) -> Option<&ServicePackage> {
    self.services.iter().find(|s| s.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn service_package() -> ServicePackage {
    ServicePackage {
      name: "WebPkg".to_string(),
      manifest_version: "1.0".to_string(),
      digested_code_packages: vec![DigestedCodePackage {
        code_package: CodePackageDecl {
          name: "Code".to_string(),
          version: "1.0".to_string(),
          ..Default::default()
        },
        rollout_version: None,
        content_checksum: Some(ContentHash("aa".to_string())),
        is_shared: false,
        run_as_policies: vec![],
        resource_governance: None,
        container_host_policy: None,
        debug_parameters: None,
      }],
      ..Default::default()
    }
  }

  #[test]
  fn checksum_ignores_rollout_versions() {
    let mut first = service_package();
    let mut second = service_package();
    let c1 = first.compute_checksum().unwrap();
    first.stamp(RolloutVersion::new(1, 0));
    second.stamp(RolloutVersion::new(7, 3));

    assert_eq!(c1, first.compute_checksum().unwrap());
    assert_eq!(c1, second.compute_checksum().unwrap());
    assert_ne!(first, second);
  }

  #[test]
  fn checksum_ignores_own_checksum_field() {
    let mut pkg = service_package();
    let before = pkg.compute_checksum().unwrap();
    pkg.content_checksum = Some(before.clone());
    assert_eq!(before, pkg.compute_checksum().unwrap());
  }

  #[test]
  fn checksum_tracks_sub_package_content() {
    let first = service_package();
    let mut second = service_package();
    second.digested_code_packages[0].content_checksum = Some(ContentHash("bb".to_string()));
    assert_ne!(first.compute_checksum().unwrap(), second.compute_checksum().unwrap());
  }

  #[test]
  fn stamp_covers_every_block() {
    let mut app = ApplicationPackage::default();
    app.stamp(RolloutVersion::new(2, 0));
    assert_eq!(app.rollout_version, Some(RolloutVersion::new(2, 0)));
    assert_eq!(app.digested_environment.rollout_version, Some(RolloutVersion::new(2, 0)));
    assert_eq!(app.digested_certificates.rollout_version, Some(RolloutVersion::new(2, 0)));

    let mut pkg = service_package();
    pkg.stamp(RolloutVersion::new(2, 0));
    assert_eq!(pkg.digested_service_types.rollout_version, Some(RolloutVersion::new(2, 0)));
    assert_eq!(pkg.digested_resources.rollout_version, Some(RolloutVersion::new(2, 0)));
    assert_eq!(
      pkg.digested_code_packages[0].rollout_version,
      Some(RolloutVersion::new(2, 0))
    );
  }
}
