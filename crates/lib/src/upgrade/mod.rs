//! Rollout version assignment on upgrade.
//!
//! [`diff`] takes the persisted tree of a running application and a target
//! tree freshly digested at the next instance version, and decides per
//! independently versioned block whether it keeps its current version,
//! takes the next minor version, or takes the next major version.
//!
//! - Application package: any change to the environment or certificate
//!   blocks bumps the package to the next major version. The environment
//!   block only moves when it changed itself.
//! - Service packages new to the application keep their digested versions.
//! - Existing service packages go major on structural change (service types,
//!   resources, crossing into multiple containers, activation impact) and
//!   minor on content-only change. Sub-blocks only take the new version when
//!   they changed.
//!
//! Blocks that did not change are carried over from the current tree
//! verbatim. The function performs no I/O.

mod compare;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub use compare::ChangeFlags;

use crate::package::{ApplicationPackage, DigestedTree, ServicePackage};
use crate::version::RolloutVersion;

use compare::{bump_modified, seed};

#[derive(Debug, Error)]
pub enum UpgradeError {
  /// The persisted tree is missing a version it must carry.
  #[error("current {what} has no rollout version")]
  MissingVersion { what: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
  Added,
  Major,
  Minor,
  Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceChange {
  pub name: String,
  pub kind: ChangeKind,
  pub version: RolloutVersion,
  pub flags: ChangeFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
  pub application: ChangeKind,
  pub application_version: RolloutVersion,
  pub environment_changed: bool,
  pub certificates_changed: bool,
  pub services: Vec<ServiceChange>,
  /// Service packages present in the current tree but not in the target.
  pub removed: Vec<String>,
}

impl UpgradeReport {
  /// True when nothing at all needs a new version.
  pub fn is_noop(&self) -> bool {
    self.application == ChangeKind::Unchanged
      && self.removed.is_empty()
      && self.services.iter().all(|s| s.kind == ChangeKind::Unchanged)
  }
}

fn required(version: Option<RolloutVersion>, what: impl FnOnce() -> String) -> Result<RolloutVersion, UpgradeError> {
  version.ok_or_else(|| UpgradeError::MissingVersion { what: what() })
}

/// Assign final rollout versions to `target` relative to `current`.
pub fn diff(current: &DigestedTree, mut target: DigestedTree) -> Result<(DigestedTree, UpgradeReport), UpgradeError> {
  let (application, app_kind, env_changed, certs_changed) = diff_application(&current.application, target.application)?;
  let application_version = required(application.rollout_version, || "application package".to_string())?;
  target.application = application;

  let mut services = Vec::with_capacity(target.services.len());
  for service in &mut target.services {
    let Some(previous) = current.service(&service.name) else {
      let version = required(service.rollout_version, || format!("target service package '{}'", service.name))?;
      debug!(service_package = %service.name, version = %version, "new service package");
      services.push(ServiceChange {
        name: service.name.clone(),
        kind: ChangeKind::Added,
        version,
        flags: ChangeFlags::default(),
      });
      continue;
    };
    services.push(diff_service(previous, service)?);
  }

  let removed: Vec<String> = current
    .services
    .iter()
    .filter(|s| target.service(&s.name).is_none())
    .map(|s| s.name.clone())
    .collect();

  let report = UpgradeReport {
    application: app_kind,
    application_version,
    environment_changed: env_changed,
    certificates_changed: certs_changed,
    services,
    removed,
  };

  info!(
    application_id = %target.application.application_id,
    version = %application_version,
    changed = report.services.iter().filter(|s| s.kind != ChangeKind::Unchanged).count(),
    removed = report.removed.len(),
    "computed upgrade versions"
  );

  Ok((target, report))
}

fn diff_application(
  current: &ApplicationPackage,
  mut target: ApplicationPackage,
) -> Result<(ApplicationPackage, ChangeKind, bool, bool), UpgradeError> {
  let version = required(current.rollout_version, || "application package".to_string())?;

  target.rollout_version = current.rollout_version;
  target.digested_environment.rollout_version = current.digested_environment.rollout_version;
  target.digested_certificates.rollout_version = current.digested_certificates.rollout_version;

  let env_changed = target.digested_environment != current.digested_environment;
  let certs_changed = target.digested_certificates != current.digested_certificates;

  if !env_changed && !certs_changed {
    return Ok((current.clone(), ChangeKind::Unchanged, false, false));
  }

  let next = version.next_major();
  target.rollout_version = Some(next);
  if env_changed {
    target.digested_environment.rollout_version = Some(next);
  }
  target.digested_certificates.rollout_version = Some(next);

  info!(env_changed, certs_changed, version = %next, "application package changed");
  Ok((target, ChangeKind::Major, env_changed, certs_changed))
}

fn diff_service(current: &ServicePackage, target: &mut ServicePackage) -> Result<ServiceChange, UpgradeError> {
  let version = required(current.rollout_version, || format!("service package '{}'", current.name))?;

  target.rollout_version = current.rollout_version;
  target.digested_service_types.rollout_version = current.digested_service_types.rollout_version;
  target.digested_resources.rollout_version = current.digested_resources.rollout_version;
  seed(&mut target.digested_code_packages, &current.digested_code_packages);
  seed(&mut target.digested_config_packages, &current.digested_config_packages);
  seed(&mut target.digested_data_packages, &current.digested_data_packages);

  let flags = ChangeFlags::between(current, target);
  let (kind, next) = if flags.requires_major() {
    (ChangeKind::Major, version.next_major())
  } else if flags.requires_minor() {
    (ChangeKind::Minor, version.next_minor())
  } else {
    *target = current.clone();
    debug!(service_package = %current.name, version = %version, "service package unchanged");
    return Ok(ServiceChange {
      name: current.name.clone(),
      kind: ChangeKind::Unchanged,
      version,
      flags,
    });
  };

  target.rollout_version = Some(next);
  if flags.service_types {
    target.digested_service_types.rollout_version = Some(next);
  }
  if flags.resources {
    target.digested_resources.rollout_version = Some(next);
  }
  if flags.code_packages {
    bump_modified(&mut target.digested_code_packages, &current.digested_code_packages, next);
  }
  if flags.config_packages {
    bump_modified(&mut target.digested_config_packages, &current.digested_config_packages, next);
  }
  if flags.data_packages {
    bump_modified(&mut target.digested_data_packages, &current.digested_data_packages, next);
  }

  info!(
    service_package = %target.name,
    from = %version,
    to = %next,
    service_types = flags.service_types,
    resources = flags.resources,
    code = flags.code_packages,
    config = flags.config_packages,
    data = flags.data_packages,
    container_group = flags.requires_container_group_setup,
    activation = flags.on_demand_activation_impacted,
    "service package changed"
  );

  Ok(ServiceChange {
    name: target.name.clone(),
    kind,
    version: next,
    flags,
  })
}
