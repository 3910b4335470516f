//! Phase orchestration over the store.
//!
//! [`ApplicationBuilder`] ties the pure pieces together:
//!
//! - `provision_type`: checksum a local build layout and publish it
//! - `create_application`: fetch a provisioned type, digest it at `1.0` and
//!   publish the documents with instance `1`
//! - `upgrade_application`: fetch the running tree and the target type in
//!   parallel, digest at the next instance version, diff, publish
//!
//! Every operation runs fetch-all, then compute, then upload-all, and the
//! instance document is always written last.

mod fetch;
mod provision;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub use provision::ProvisionReport;

use crate::checksum::ChecksumError;
use crate::config::BuilderConfig;
use crate::consts::DEBUG_PARAMS_KEY;
use crate::digest::{DigestError, DigestRequest, Digester, InstanceMeta, build_instance};
use crate::manifest::{ApplicationTypeDescriptor, ManifestError};
use crate::package::{ApplicationInstance, DigestedTree};
use crate::params::ParameterTable;
use crate::store::{Deadline, LayoutSpec, Store, StoreError, StoreLayout};
use crate::sync::{SyncError, SyncItem, SyncPlanner, SyncSummary};
use crate::upgrade::{UpgradeError, UpgradeReport, diff};
use crate::validate::{StructureValidator, Validator};
use crate::version::RolloutVersion;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Digest(#[from] DigestError),

  #[error(transparent)]
  Upgrade(#[from] UpgradeError),

  #[error(transparent)]
  Sync(#[from] SyncError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error("malformed document at {path}: {source}")]
  Document {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("store holds {found} at the path for {expected}")]
  TypeMismatch { expected: String, found: String },

  #[error("application '{application_id}' already exists")]
  AlreadyExists { application_id: String },

  #[error("{0} has no rollout version")]
  Unversioned(String),

  #[error("task failed: {0}")]
  Task(String),
}

impl From<StoreError> for BuildError {
  fn from(err: StoreError) -> Self {
    BuildError::Sync(SyncError::from(err))
  }
}

/// Identity and parameters of an application being created.
#[derive(Debug, Clone)]
pub struct CreateRequest {
  pub application_type: String,
  pub type_version: String,
  pub application_id: String,
  pub name_uri: String,
  pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
  pub application_type: String,
  pub application_id: String,
  pub current_instance: u64,
  pub target_version: String,
  /// Overlaid on the parameters of the current instance.
  pub parameters: BTreeMap<String, String>,
}

/// Result of a create or upgrade.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
  pub instance: ApplicationInstance,
  pub summary: SyncSummary,
  pub upgrade: Option<UpgradeReport>,
}

pub struct ApplicationBuilder<S: Store> {
  store: Arc<S>,
  layout: Arc<dyn LayoutSpec>,
  validator: Arc<dyn Validator>,
  config: BuilderConfig,
}

impl<S: Store> ApplicationBuilder<S> {
  pub fn new(store: Arc<S>, config: BuilderConfig) -> Self {
    Self {
      store,
      layout: Arc::new(StoreLayout),
      validator: Arc::new(StructureValidator),
      config,
    }
  }

  pub fn with_layout(mut self, layout: impl LayoutSpec + 'static) -> Self {
    self.layout = Arc::new(layout);
    self
  }

  pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
    self.validator = Arc::new(validator);
    self
  }

  pub fn config(&self) -> &BuilderConfig {
    &self.config
  }

  /// A deadline `default_timeout` from now.
  pub fn deadline(&self) -> Deadline {
    Deadline::after(self.config.default_timeout)
  }

  fn planner(&self) -> SyncPlanner<S> {
    SyncPlanner::new(
      Arc::clone(&self.store),
      self.config.parallelism,
      self.config.skip_checksum_validation,
    )
  }

  pub async fn create_application(&self, request: CreateRequest, deadline: Deadline) -> Result<Deployment, BuildError> {
    let instance_path = self
      .layout
      .application_instance(&request.application_type, &request.application_id, 1);
    let timeout = deadline.remaining(&format!("existence check of {instance_path}"))?;
    if self.store.exists(&instance_path, timeout).await? {
      return Err(BuildError::AlreadyExists {
        application_id: request.application_id,
      });
    }

    let (app, manifests) = self
      .fetch_type(&request.application_type, &request.type_version, deadline)
      .await?;

    let params = ParameterTable::for_application(&app, &request.parameters).map_err(DigestError::from)?;
    let digester = Digester::new(&params, self.config.digest_settings(), self.validator.as_ref());
    let tree = digester.digest(
      &app,
      &manifests,
      &DigestRequest {
        application_id: request.application_id.clone(),
        name_uri: request.name_uri.clone(),
        rollout_version: RolloutVersion::for_instance(1),
      },
    )?;

    let instance = build_instance(
      &app,
      &params,
      &tree,
      InstanceMeta {
        application_id: request.application_id,
        name_uri: request.name_uri,
        instance_version: 1,
        parameters: request.parameters,
      },
    )?;

    let summary = self.publish_documents(&tree, &instance, deadline).await?;
    info!(
      application_id = %instance.application_id,
      application_type = %instance.application_type_name,
      "application created"
    );

    Ok(Deployment {
      instance,
      summary,
      upgrade: None,
    })
  }

  pub async fn upgrade_application(
    &self,
    request: UpgradeRequest,
    deadline: Deadline,
  ) -> Result<Deployment, BuildError> {
    let (current_instance, current_tree) = self
      .load_application(&request.application_type, &request.application_id, request.current_instance, deadline)
      .await?;
    let (app, manifests) = self
      .fetch_type(&request.application_type, &request.target_version, deadline)
      .await?;

    let parameters = carry_parameters(&app, &current_instance.parameters, request.parameters);
    let params = ParameterTable::for_application(&app, &parameters).map_err(DigestError::from)?;

    let next_instance = request.current_instance + 1;
    let digester = Digester::new(&params, self.config.digest_settings(), self.validator.as_ref());
    let target = digester.digest(
      &app,
      &manifests,
      &DigestRequest {
        application_id: request.application_id.clone(),
        name_uri: current_instance.name_uri.clone(),
        rollout_version: RolloutVersion::for_instance(next_instance),
      },
    )?;

    let (tree, report) = diff(&current_tree, target)?;

    let instance = build_instance(
      &app,
      &params,
      &tree,
      InstanceMeta {
        application_id: request.application_id,
        name_uri: current_instance.name_uri,
        instance_version: next_instance,
        parameters,
      },
    )?;

    let summary = self.publish_documents(&tree, &instance, deadline).await?;
    info!(
      application_id = %instance.application_id,
      from = request.current_instance,
      to = next_instance,
      noop = report.is_noop(),
      "application upgraded"
    );

    Ok(Deployment {
      instance,
      summary,
      upgrade: Some(report),
    })
  }

  /// Delete every document of an application instance folder.
  pub async fn remove_application(
    &self,
    application_type: &str,
    application_id: &str,
    deadline: Deadline,
  ) -> Result<(), BuildError> {
    let folder = self.layout.application_folder(application_type, application_id);
    let timeout = deadline.remaining(&format!("delete of {folder}"))?;
    self.store.delete(&folder, timeout).await?;
    info!(application_id, application_type, "application removed");
    Ok(())
  }

  async fn publish_documents(
    &self,
    tree: &DigestedTree,
    instance: &ApplicationInstance,
    deadline: Deadline,
  ) -> Result<SyncSummary, BuildError> {
    let app_type = &instance.application_type_name;
    let app_id = &instance.application_id;

    let app_version = tree
      .application
      .rollout_version
      .ok_or_else(|| BuildError::Unversioned("application package".to_string()))?;
    let mut items = vec![document(
      self.layout.application_package(app_type, app_id, app_version),
      &tree.application,
    )?];

    for service in &tree.services {
      let version = service
        .rollout_version
        .ok_or_else(|| BuildError::Unversioned(format!("service package '{}'", service.name)))?;
      items.push(document(
        self.layout.service_package(app_type, app_id, &service.name, version),
        service,
      )?);
    }

    let commit = document(
      self
        .layout
        .application_instance(app_type, app_id, instance.instance_version),
      instance,
    )?;

    Ok(self.planner().sync(items, Some(commit), deadline).await?)
  }
}

/// Parameters of the current instance, overlaid with `overrides`, keeping
/// only what the target type still declares.
fn carry_parameters(
  app: &ApplicationTypeDescriptor,
  current: &BTreeMap<String, String>,
  overrides: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
  let mut merged = BTreeMap::new();
  for (name, value) in current {
    if name == DEBUG_PARAMS_KEY || app.parameters.iter().any(|p| &p.name == name) {
      merged.insert(name.clone(), value.clone());
    } else {
      warn!(parameter = %name, "dropping parameter not declared by the target application type");
    }
  }
  merged.extend(overrides);
  merged
}

fn document<T: Serialize>(path: String, value: &T) -> Result<SyncItem, BuildError> {
  SyncItem::json(path.clone(), value).map_err(|source| BuildError::Document { path, source })
}

fn decode<T: DeserializeOwned>(bytes: &[u8], path: &str) -> Result<T, BuildError> {
  serde_json::from_slice(bytes).map_err(|source| BuildError::Document {
    path: path.to_string(),
    source,
  })
}

async fn download<S: Store>(store: &S, path: &str, deadline: Deadline) -> Result<Vec<u8>, BuildError> {
  let timeout = deadline.remaining(&format!("download of {path}"))?;
  Ok(store.download(path, timeout).await?)
}

/// Drain a join set, aborting the rest on the first failure.
async fn join_all<T: Send + 'static>(mut join_set: JoinSet<Result<T, BuildError>>) -> Result<Vec<T>, BuildError> {
  let mut results = Vec::with_capacity(join_set.len());
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(Ok(value)) => results.push(value),
      Ok(Err(e)) => {
        join_set.abort_all();
        return Err(e);
      }
      Err(e) => {
        join_set.abort_all();
        return Err(BuildError::Task(e.to_string()));
      }
    }
  }
  Ok(results)
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::Path;

  use tempfile::TempDir;

  use super::*;
  use crate::manifest::ServiceManifestDescriptor;
  use crate::store::LocalStore;
  use crate::sync::SyncError;
  use crate::upgrade::ChangeKind;
  use crate::util::testutil::*;

  const APP_TYPE: &str = "VotingType";

  fn write_json<T: Serialize>(path: &Path, value: &T) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
  }

  /// Lay out a build folder; every sub-package folder holds one file whose
  /// content is `<manifest>/<package>/<version>` unless overridden.
  fn write_layout(
    root: &Path,
    app: &ApplicationTypeDescriptor,
    manifests: &[ServiceManifestDescriptor],
    overrides: &[(&str, &str, &str)],
  ) {
    let build = crate::manifest::BuildLayout::new(root);
    write_json(&build.application_manifest_file(), app);
    for descriptor in manifests {
      write_json(&build.service_manifest_file(&descriptor.name), descriptor);
      let manifest = crate::manifest::ServiceManifest::new(descriptor.clone());
      for (_, name, version) in manifest.sub_packages() {
        let dir = build.sub_package_dir(&descriptor.name, name);
        fs::create_dir_all(&dir).unwrap();
        let content = overrides
          .iter()
          .find(|(sm, pkg, _)| *sm == descriptor.name && *pkg == name)
          .map(|(_, _, c)| c.to_string())
          .unwrap_or_else(|| format!("{}/{name}/{version}", descriptor.name));
        fs::write(dir.join("payload"), content).unwrap();
      }
    }
  }

  struct Fixture {
    _temp: TempDir,
    root: std::path::PathBuf,
    builder: ApplicationBuilder<LocalStore>,
  }

  impl Fixture {
    fn new() -> Self {
      let temp = TempDir::new().unwrap();
      let root = temp.path().to_path_buf();
      let config = BuilderConfig {
        parallelism: 4,
        ..Default::default()
      };
      let builder = ApplicationBuilder::new(Arc::new(LocalStore::new(root.join("store"))), config);
      Self {
        _temp: temp,
        root,
        builder,
      }
    }

    fn build_dir(&self, name: &str) -> std::path::PathBuf {
      self.root.join(name)
    }

    async fn provision_v1(&self) -> ProvisionReport {
      let dir = self.build_dir("v1");
      write_layout(&dir, &sample_app(), &[web_manifest(), store_manifest()], &[]);
      self.builder.provision_type(dir, self.builder.deadline()).await.unwrap()
    }

    async fn create(&self) -> Deployment {
      self
        .builder
        .create_application(
          CreateRequest {
            application_type: APP_TYPE.to_string(),
            type_version: "1.0".to_string(),
            application_id: "voting".to_string(),
            name_uri: "app:/voting".to_string(),
            parameters: BTreeMap::new(),
          },
          self.builder.deadline(),
        )
        .await
        .unwrap()
    }

    async fn upgrade(&self, current: u64, target: &str) -> Result<Deployment, BuildError> {
      self
        .builder
        .upgrade_application(
          UpgradeRequest {
            application_type: APP_TYPE.to_string(),
            application_id: "voting".to_string(),
            current_instance: current,
            target_version: target.to_string(),
            parameters: BTreeMap::new(),
          },
          self.builder.deadline(),
        )
        .await
    }
  }

  /// Version 2.0 of the type: WebPkg 1.1 ships a new code package 1.1.
  fn v2_layout(dir: &Path, include_config: bool) {
    let mut app = sample_app();
    app.type_version = "2.0".to_string();
    app.service_manifest_imports[0].service_manifest_ref.version = "1.1".to_string();

    let mut web = web_manifest();
    web.version = "1.1".to_string();
    web.code_packages[0].version = "1.1".to_string();

    write_layout(dir, &app, &[web, store_manifest()], &[]);
    if !include_config {
      fs::remove_dir_all(dir.join("WebPkg").join("Config")).unwrap();
    }
  }

  #[tokio::test]
  async fn provision_publishes_every_artifact_once() {
    let fx = Fixture::new();
    let first = fx.provision_v1().await;
    assert_eq!(first.application_type, APP_TYPE);
    // application manifest, two service manifests, four sub-packages
    assert_eq!(first.summary.uploaded.len(), 7);

    let again = fx
      .builder
      .provision_type(fx.build_dir("v1"), fx.builder.deadline())
      .await
      .unwrap();
    assert!(again.summary.uploaded.is_empty());
    assert_eq!(again.summary.unchanged.len(), 7);
  }

  #[tokio::test]
  async fn provision_result_does_not_depend_on_parallelism() {
    let fx = Fixture::new();
    let parallel = fx.provision_v1().await;

    let serial = ApplicationBuilder::new(
      Arc::new(LocalStore::new(fx.root.join("serial-store"))),
      BuilderConfig {
        parallelism: 1,
        ..Default::default()
      },
    );
    let report = serial
      .provision_type(fx.build_dir("v1"), serial.deadline())
      .await
      .unwrap();

    let mut expected = parallel.summary.uploaded.clone();
    let mut actual = report.summary.uploaded.clone();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);
  }

  #[tokio::test]
  async fn reprovision_with_changed_content_conflicts() {
    let fx = Fixture::new();
    fx.provision_v1().await;

    let dir = fx.build_dir("v1-modified");
    write_layout(
      &dir,
      &sample_app(),
      &[web_manifest(), store_manifest()],
      &[("WebPkg", "Code", "patched in place")],
    );
    let err = fx.builder.provision_type(dir, fx.builder.deadline()).await.unwrap_err();
    assert!(matches!(err, BuildError::Sync(SyncError::VersionReuseConflict { .. })));
  }

  #[tokio::test]
  async fn missing_local_package_reuses_store_copy() {
    let fx = Fixture::new();
    fx.provision_v1().await;

    let dir = fx.build_dir("v2");
    v2_layout(&dir, false);
    let report = fx.builder.provision_type(dir, fx.builder.deadline()).await.unwrap();
    assert_eq!(report.reused, vec!["Store/VotingType/WebPkg.Config.Config.1.0"]);
  }

  #[tokio::test]
  async fn missing_package_everywhere_is_reference_error() {
    let fx = Fixture::new();
    let dir = fx.build_dir("v1");
    write_layout(&dir, &sample_app(), &[web_manifest(), store_manifest()], &[]);
    fs::remove_dir_all(dir.join("WebPkg").join("Data")).unwrap();

    let err = fx.builder.provision_type(dir, fx.builder.deadline()).await.unwrap_err();
    assert!(matches!(err, BuildError::Digest(DigestError::Reference(_))));
  }

  #[tokio::test]
  async fn create_writes_documents_and_instance() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    let created = fx.create().await;

    assert_eq!(created.instance.instance_version, 1);
    assert_eq!(created.instance.application_package_ref, RolloutVersion::new(1, 0));
    assert_eq!(created.summary.uploaded.len(), 4);
    assert_eq!(
      created.summary.uploaded.last().map(String::as_str),
      Some("Store/VotingType/apps/voting/ApplicationInstance.1.json")
    );

    let (instance, tree) = fx
      .builder
      .load_application(APP_TYPE, "voting", 1, fx.builder.deadline())
      .await
      .unwrap();
    assert_eq!(instance, created.instance);
    let web = tree.service("WebPkg").unwrap();
    assert!(web.code_package("Code").unwrap().content_checksum.is_some());
    assert!(web.manifest_checksum.is_some());
  }

  #[tokio::test]
  async fn create_twice_is_rejected() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    fx.create().await;

    let err = fx
      .builder
      .create_application(
        CreateRequest {
          application_type: APP_TYPE.to_string(),
          type_version: "1.0".to_string(),
          application_id: "voting".to_string(),
          name_uri: "app:/voting".to_string(),
          parameters: BTreeMap::new(),
        },
        fx.builder.deadline(),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::AlreadyExists { .. }));
  }

  #[tokio::test]
  async fn same_version_upgrade_only_writes_instance() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    fx.create().await;

    let upgraded = fx.upgrade(1, "1.0").await.unwrap();
    assert!(upgraded.upgrade.as_ref().unwrap().is_noop());
    assert_eq!(
      upgraded.summary.uploaded,
      vec!["Store/VotingType/apps/voting/ApplicationInstance.2.json"]
    );
    assert_eq!(upgraded.instance.application_package_ref, RolloutVersion::new(1, 0));
  }

  #[tokio::test]
  async fn code_change_upgrade_bumps_minor_only_where_changed() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    fx.create().await;

    let dir = fx.build_dir("v2");
    v2_layout(&dir, true);
    fx.builder.provision_type(dir, fx.builder.deadline()).await.unwrap();

    let upgraded = fx.upgrade(1, "2.0").await.unwrap();
    let report = upgraded.upgrade.unwrap();
    assert_eq!(report.application, ChangeKind::Unchanged);
    assert_eq!(report.services[0].kind, ChangeKind::Minor);
    assert_eq!(report.services[1].kind, ChangeKind::Unchanged);

    let instance = &upgraded.instance;
    assert_eq!(instance.instance_version, 2);
    assert_eq!(instance.service_package_version("WebPkg"), Some(RolloutVersion::new(1, 1)));
    assert_eq!(instance.service_package_version("StorePkg"), Some(RolloutVersion::new(1, 0)));

    let (_, tree) = fx
      .builder
      .load_application(APP_TYPE, "voting", 2, fx.builder.deadline())
      .await
      .unwrap();
    let web = tree.service("WebPkg").unwrap();
    assert_eq!(web.code_package("Code").unwrap().rollout_version, Some(RolloutVersion::new(1, 1)));
    assert_eq!(
      web.config_package("Config").unwrap().rollout_version,
      Some(RolloutVersion::new(1, 0))
    );
  }

  #[tokio::test]
  async fn upgrade_carries_parameters_forward() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    fx.builder
      .create_application(
        CreateRequest {
          application_type: APP_TYPE.to_string(),
          type_version: "1.0".to_string(),
          application_id: "voting".to_string(),
          name_uri: "app:/voting".to_string(),
          parameters: BTreeMap::from([("InstanceCount".to_string(), "4".to_string())]),
        },
        fx.builder.deadline(),
      )
      .await
      .unwrap();

    let upgraded = fx.upgrade(1, "1.0").await.unwrap();
    assert_eq!(upgraded.instance.parameters.get("InstanceCount").map(String::as_str), Some("4"));
  }

  #[tokio::test]
  async fn remove_deletes_application_folder() {
    let fx = Fixture::new();
    fx.provision_v1().await;
    fx.create().await;

    fx.builder
      .remove_application(APP_TYPE, "voting", fx.builder.deadline())
      .await
      .unwrap();
    assert!(
      fx.builder
        .load_application(APP_TYPE, "voting", 1, fx.builder.deadline())
        .await
        .is_err()
    );
  }

  #[test]
  fn carried_parameters_drop_undeclared_names() {
    let app = sample_app();
    let current = BTreeMap::from([
      ("Mode".to_string(), "test".to_string()),
      ("Retired".to_string(), "x".to_string()),
    ]);
    let overrides = BTreeMap::from([("MemoryMb".to_string(), "256".to_string())]);
    let merged = carry_parameters(&app, &current, overrides);
    assert_eq!(merged.get("Mode").map(String::as_str), Some("test"));
    assert_eq!(merged.get("MemoryMb").map(String::as_str), Some("256"));
    assert!(!merged.contains_key("Retired"));
  }
}
