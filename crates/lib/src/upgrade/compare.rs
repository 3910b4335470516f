//! Change detection between two versions of a service package.

use serde::Serialize;

use crate::manifest::CertificateRef;
use crate::package::{
  DigestedCodePackage, DigestedConfigPackage, DigestedDataPackage, DigestedEndpoint, DigestedServiceType,
  ServicePackage,
};
use crate::version::RolloutVersion;

pub(crate) trait Named {
  fn entry_name(&self) -> &str;
}

/// A sub-package entry carrying its own rollout version.
pub(crate) trait Versioned: Named + PartialEq {
  fn rollout_version(&self) -> Option<RolloutVersion>;
  fn set_rollout_version(&mut self, version: Option<RolloutVersion>);
}

impl Named for DigestedServiceType {
  fn entry_name(&self) -> &str {
    &self.service_type_name
  }
}

impl Named for DigestedEndpoint {
  fn entry_name(&self) -> &str {
    &self.endpoint.name
  }
}

impl Named for CertificateRef {
  fn entry_name(&self) -> &str {
    &self.name
  }
}

macro_rules! versioned_sub_package {
  ($($ty:ty),*) => {
    $(
      impl Named for $ty {
        fn entry_name(&self) -> &str {
          self.name()
        }
      }

      impl Versioned for $ty {
        fn rollout_version(&self) -> Option<RolloutVersion> {
          self.rollout_version
        }

        fn set_rollout_version(&mut self, version: Option<RolloutVersion>) {
          self.rollout_version = version;
        }
      }
    )*
  };
}

versioned_sub_package!(DigestedCodePackage, DigestedConfigPackage, DigestedDataPackage);

pub(crate) fn find<'a, T: Named>(entries: &'a [T], name: &str) -> Option<&'a T> {
  entries.iter().find(|e| e.entry_name() == name)
}

/// Equal as sets keyed by name, ignoring declaration order.
pub(crate) fn same_by_name<T: Named + PartialEq>(current: &[T], target: &[T]) -> bool {
  current.len() == target.len() && target.iter().all(|t| find(current, t.entry_name()) == Some(t))
}

fn same_names<T: Named>(current: &[T], target: &[T]) -> bool {
  current.iter().all(|c| find(target, c.entry_name()).is_some())
    && target.iter().all(|t| find(current, t.entry_name()).is_some())
}

/// Copy the rollout version of every same-named entry in `current` onto `target`.
pub(crate) fn seed<T: Versioned>(target: &mut [T], current: &[T]) {
  for entry in target.iter_mut() {
    if let Some(previous) = find(current, entry.entry_name()) {
      entry.set_rollout_version(previous.rollout_version());
    }
  }
}

/// Give `version` to every entry that exists in `current` with different content.
///
/// Entries new to `target` keep the version they were digested with.
pub(crate) fn bump_modified<T: Versioned>(target: &mut [T], current: &[T], version: RolloutVersion) -> usize {
  let mut bumped = 0;
  for entry in target.iter_mut() {
    let modified = find(current, entry.entry_name()).is_some_and(|previous| previous != &*entry);
    if modified {
      entry.set_rollout_version(Some(version));
      bumped += 1;
    }
  }
  bumped
}

/// Which parts of a service package differ between current and target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeFlags {
  pub service_types: bool,
  pub resources: bool,
  pub diagnostics: bool,
  pub code_packages: bool,
  pub config_packages: bool,
  pub data_packages: bool,
  pub requires_container_group_setup: bool,
  pub on_demand_activation_impacted: bool,
}

impl ChangeFlags {
  /// Compare two service packages whose rollout versions were already seeded.
  pub fn between(current: &ServicePackage, target: &ServicePackage) -> Self {
    let code_packages = !same_by_name(&current.digested_code_packages, &target.digested_code_packages);

    Self {
      service_types: !same_by_name(
        &current.digested_service_types.service_types,
        &target.digested_service_types.service_types,
      ),
      resources: !same_by_name(&current.digested_resources.endpoints, &target.digested_resources.endpoints)
        || !same_by_name(
          &current.digested_resources.certificates,
          &target.digested_resources.certificates,
        ),
      diagnostics: current.diagnostics != target.diagnostics,
      code_packages,
      config_packages: !same_by_name(&current.digested_config_packages, &target.digested_config_packages),
      data_packages: !same_by_name(&current.digested_data_packages, &target.digested_data_packages),
      requires_container_group_setup: current.container_code_package_count() <= 1
        && target.container_code_package_count() > 1,
      on_demand_activation_impacted: code_packages && activation_impacted(current, target),
    }
  }

  pub fn requires_major(&self) -> bool {
    self.resources || self.service_types || self.requires_container_group_setup || self.on_demand_activation_impacted
  }

  pub fn requires_minor(&self) -> bool {
    self.code_packages || self.config_packages || self.data_packages || self.diagnostics
  }
}

fn activator(service: &ServicePackage) -> Option<&DigestedCodePackage> {
  service.digested_code_packages.iter().find(|p| p.code_package.is_activator)
}

fn activation_impacted(current: &ServicePackage, target: &ServicePackage) -> bool {
  !same_names(&current.digested_code_packages, &target.digested_code_packages) || activator(current) != activator(target)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::CodePackageDecl;
  use crate::util::hash::ContentHash;

  fn code(name: &str, checksum: &str) -> DigestedCodePackage {
    DigestedCodePackage {
      code_package: CodePackageDecl {
        name: name.to_string(),
        version: "1.0".to_string(),
        ..Default::default()
      },
      rollout_version: Some(RolloutVersion::new(1, 0)),
      content_checksum: Some(ContentHash(checksum.to_string())),
      is_shared: false,
      run_as_policies: vec![],
      resource_governance: None,
      container_host_policy: None,
      debug_parameters: None,
    }
  }

  fn service(packages: Vec<DigestedCodePackage>) -> ServicePackage {
    ServicePackage {
      name: "Svc".to_string(),
      digested_code_packages: packages,
      ..Default::default()
    }
  }

  #[test]
  fn order_does_not_matter() {
    let a = vec![code("A", "1"), code("B", "2")];
    let b = vec![code("B", "2"), code("A", "1")];
    assert!(same_by_name(&a, &b));
    assert!(!same_by_name(&a, &b[..1]));
  }

  #[test]
  fn seed_copies_versions_by_name() {
    let current = vec![code("A", "1")];
    let mut target = vec![code("A", "1"), code("New", "3")];
    for p in &mut target {
      p.rollout_version = Some(RolloutVersion::new(4, 0));
    }
    seed(&mut target, &current);
    assert_eq!(target[0].rollout_version, Some(RolloutVersion::new(1, 0)));
    assert_eq!(target[1].rollout_version, Some(RolloutVersion::new(4, 0)));
  }

  #[test]
  fn bump_skips_unchanged_and_new_entries() {
    let current = vec![code("A", "1"), code("B", "2")];
    let mut target = vec![code("A", "1"), code("B", "changed"), code("C", "3")];
    let bumped = bump_modified(&mut target, &current, RolloutVersion::new(1, 1));
    assert_eq!(bumped, 1);
    assert_eq!(target[0].rollout_version, Some(RolloutVersion::new(1, 0)));
    assert_eq!(target[1].rollout_version, Some(RolloutVersion::new(1, 1)));
    assert_eq!(target[2].rollout_version, Some(RolloutVersion::new(1, 0)));
  }

  #[test]
  fn sibling_content_change_does_not_impact_activation() {
    let mut activator_pkg = code("Activator", "1");
    activator_pkg.code_package.is_activator = true;
    let current = service(vec![activator_pkg.clone(), code("Worker", "1")]);
    let target = service(vec![activator_pkg, code("Worker", "2")]);

    let flags = ChangeFlags::between(&current, &target);
    assert!(flags.code_packages);
    assert!(!flags.on_demand_activation_impacted);
    assert!(!flags.requires_major());
    assert!(flags.requires_minor());
  }

  #[test]
  fn activator_change_impacts_activation() {
    let mut before = code("Activator", "1");
    before.code_package.is_activator = true;
    let mut after = code("Activator", "2");
    after.code_package.is_activator = true;

    let flags = ChangeFlags::between(&service(vec![before]), &service(vec![after]));
    assert!(flags.on_demand_activation_impacted);
    assert!(flags.requires_major());
  }

  #[test]
  fn added_code_package_impacts_activation() {
    let current = service(vec![code("A", "1")]);
    let target = service(vec![code("A", "1"), code("B", "1")]);
    assert!(ChangeFlags::between(&current, &target).on_demand_activation_impacted);
  }
}
