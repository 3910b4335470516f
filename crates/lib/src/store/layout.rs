//! Logical path naming inside the store.

use crate::consts::STORE_ROOT;
use crate::manifest::SubPackageKind;
use crate::version::RolloutVersion;

/// Pure mapping from package identity to a logical store path.
pub trait LayoutSpec: Send + Sync {
  fn application_manifest(&self, app_type: &str, type_version: &str) -> String;

  fn service_manifest(&self, app_type: &str, service_manifest: &str, version: &str) -> String;

  fn sub_package(
    &self,
    app_type: &str,
    service_manifest: &str,
    kind: SubPackageKind,
    package: &str,
    version: &str,
  ) -> String;

  /// Folder holding every document of one application instance.
  fn application_folder(&self, app_type: &str, application_id: &str) -> String;

  fn application_instance(&self, app_type: &str, application_id: &str, instance_version: u64) -> String;

  fn application_package(&self, app_type: &str, application_id: &str, version: RolloutVersion) -> String;

  fn service_package(&self, app_type: &str, application_id: &str, service_package: &str, version: RolloutVersion)
  -> String;
}

#[derive(Debug, Clone, Default)]
pub struct StoreLayout;

impl StoreLayout {
  fn type_folder(app_type: &str) -> String {
    format!("{STORE_ROOT}/{app_type}")
  }
}

impl LayoutSpec for StoreLayout {
  fn application_manifest(&self, app_type: &str, type_version: &str) -> String {
    format!("{}/ApplicationManifest.{type_version}.json", Self::type_folder(app_type))
  }

  fn service_manifest(&self, app_type: &str, service_manifest: &str, version: &str) -> String {
    format!("{}/{service_manifest}.Manifest.{version}.json", Self::type_folder(app_type))
  }

  fn sub_package(
    &self,
    app_type: &str,
    service_manifest: &str,
    kind: SubPackageKind,
    package: &str,
    version: &str,
  ) -> String {
    format!("{}/{service_manifest}.{kind}.{package}.{version}", Self::type_folder(app_type))
  }

  fn application_folder(&self, app_type: &str, application_id: &str) -> String {
    format!("{}/apps/{application_id}", Self::type_folder(app_type))
  }

  fn application_instance(&self, app_type: &str, application_id: &str, instance_version: u64) -> String {
    format!(
      "{}/ApplicationInstance.{instance_version}.json",
      self.application_folder(app_type, application_id)
    )
  }

  fn application_package(&self, app_type: &str, application_id: &str, version: RolloutVersion) -> String {
    format!(
      "{}/ApplicationPackage.{version}.json",
      self.application_folder(app_type, application_id)
    )
  }

  fn service_package(
    &self,
    app_type: &str,
    application_id: &str,
    service_package: &str,
    version: RolloutVersion,
  ) -> String {
    format!(
      "{}/{service_package}.Package.{version}.json",
      self.application_folder(app_type, application_id)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_level_paths() {
    let layout = StoreLayout;
    assert_eq!(
      layout.application_manifest("VotingType", "1.0"),
      "Store/VotingType/ApplicationManifest.1.0.json"
    );
    assert_eq!(
      layout.sub_package("VotingType", "WebPkg", SubPackageKind::Config, "Config", "2.1"),
      "Store/VotingType/WebPkg.Config.Config.2.1"
    );
  }

  #[test]
  fn application_paths_share_a_folder() {
    let layout = StoreLayout;
    let folder = layout.application_folder("VotingType", "voting");
    assert!(layout.application_instance("VotingType", "voting", 3).starts_with(&folder));
    assert_eq!(
      layout.service_package("VotingType", "voting", "WebPkg", RolloutVersion::new(2, 1)),
      "Store/VotingType/apps/voting/WebPkg.Package.2.1.json"
    );
  }
}
