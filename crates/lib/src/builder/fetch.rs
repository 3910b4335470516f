//! Reading provisioned types and running applications back from the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use super::{ApplicationBuilder, BuildError, decode, download, join_all};
use crate::digest::DigestError;
use crate::manifest::{
  ApplicationTypeDescriptor, ServiceManifest, ServiceManifestDescriptor, parse_application_manifest,
  parse_service_manifest,
};
use crate::package::{ApplicationInstance, ApplicationPackage, DigestedTree, ServicePackage};
use crate::store::{Deadline, Store};

impl<S: Store> ApplicationBuilder<S> {
  /// Download an application type and its service manifests, with the
  /// recorded checksum of every manifest and sub-package attached.
  pub async fn fetch_type(
    &self,
    app_type: &str,
    type_version: &str,
    deadline: Deadline,
  ) -> Result<(ApplicationTypeDescriptor, Vec<ServiceManifest>), BuildError> {
    let app_path = self.layout.application_manifest(app_type, type_version);
    let app = parse_application_manifest(&download(self.store.as_ref(), &app_path, deadline).await?, &app_path)?;
    if app.type_name != app_type || app.type_version != type_version {
      return Err(BuildError::TypeMismatch {
        expected: format!("{app_type} {type_version}"),
        found: format!("{} {}", app.type_name, app.type_version),
      });
    }

    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();
    for import in &app.service_manifest_imports {
      let reference = &import.service_manifest_ref;
      let path = self.layout.service_manifest(app_type, &reference.name, &reference.version);
      let store = Arc::clone(&self.store);
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.map_err(|e| BuildError::Task(e.to_string()))?;
        let bytes = download(store.as_ref(), &path, deadline).await?;
        let descriptor = parse_service_manifest(&bytes, &path)?;
        Ok::<_, BuildError>((path, descriptor))
      });
    }
    let fetched: BTreeMap<String, (String, ServiceManifestDescriptor)> = join_all(join_set)
      .await?
      .into_iter()
      .map(|(path, descriptor)| (descriptor.name.clone(), (path, descriptor)))
      .collect();

    let mut witness_paths = Vec::new();
    for (path, descriptor) in fetched.values() {
      witness_paths.push(path.clone());
      let manifest = ServiceManifest::new(descriptor.clone());
      for (kind, name, version) in manifest.sub_packages() {
        witness_paths.push(self.layout.sub_package(app_type, &descriptor.name, kind, name, version));
      }
    }
    let witnesses = self.planner().witnesses(witness_paths, deadline).await?;

    let mut manifests = Vec::with_capacity(app.service_manifest_imports.len());
    for import in &app.service_manifest_imports {
      let name = &import.service_manifest_ref.name;
      let Some((path, descriptor)) = fetched.get(name) else {
        return Err(
          DigestError::Reference(format!("service manifest '{name}' is not provisioned for {app_type}")).into(),
        );
      };
      let mut manifest = ServiceManifest::new(descriptor.clone());
      manifest.checksum = witnesses.get(path).cloned().flatten();

      let packages: Vec<_> = manifest
        .sub_packages()
        .into_iter()
        .map(|(kind, package, version)| {
          (
            kind,
            package.to_string(),
            self.layout.sub_package(app_type, name, kind, package, version),
          )
        })
        .collect();
      for (kind, package, path) in packages {
        if let Some(checksum) = witnesses.get(&path).cloned().flatten() {
          manifest.set_package_checksum(kind, package, checksum);
        }
      }
      manifests.push(manifest);
    }

    debug!(
      application_type = app_type,
      type_version,
      service_manifests = manifests.len(),
      "fetched application type"
    );
    Ok((app, manifests))
  }

  /// Download an instance document and every package it refers to.
  pub async fn load_application(
    &self,
    app_type: &str,
    application_id: &str,
    instance_version: u64,
    deadline: Deadline,
  ) -> Result<(ApplicationInstance, DigestedTree), BuildError> {
    let instance_path = self.layout.application_instance(app_type, application_id, instance_version);
    let instance: ApplicationInstance =
      decode(&download(self.store.as_ref(), &instance_path, deadline).await?, &instance_path)?;

    let app_path = self
      .layout
      .application_package(app_type, application_id, instance.application_package_ref);
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();
    for (index, reference) in instance.service_package_refs.iter().enumerate() {
      let path = self
        .layout
        .service_package(app_type, application_id, &reference.name, reference.rollout_version);
      let store = Arc::clone(&self.store);
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.map_err(|e| BuildError::Task(e.to_string()))?;
        let package: ServicePackage = decode(&download(store.as_ref(), &path, deadline).await?, &path)?;
        Ok::<_, BuildError>((index, package))
      });
    }

    let application: ApplicationPackage = decode(&download(self.store.as_ref(), &app_path, deadline).await?, &app_path)?;
    let mut services = join_all(join_set).await?;
    services.sort_by_key(|(index, _)| *index);

    Ok((
      instance,
      DigestedTree {
        application,
        services: services.into_iter().map(|(_, package)| package).collect(),
      },
    ))
  }
}
