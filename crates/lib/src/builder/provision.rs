//! Publishing a local build layout as an application type.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{ApplicationBuilder, BuildError};
use crate::checksum::{ChecksumError, content_checksum_async};
use crate::digest::DigestError;
use crate::manifest::{BuildLayout, CodePackageDecl, ServiceManifest, SubPackageKind};
use crate::store::{Deadline, Store};
use crate::sync::{SyncItem, SyncSummary};

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
  pub application_type: String,
  pub type_version: String,
  pub summary: SyncSummary,
  /// Sub-packages absent locally whose store copy was reused.
  pub reused: Vec<String>,
}

/// A container image built elsewhere needs no package folder.
fn may_be_absent(code: &CodePackageDecl) -> bool {
  code.setup_entry_point.is_none()
    && code
      .container()
      .is_some_and(|c| c.from_source.as_deref().is_none_or(str::is_empty))
}

impl<S: Store> ApplicationBuilder<S> {
  pub async fn provision_type(&self, build_root: PathBuf, deadline: Deadline) -> Result<ProvisionReport, BuildError> {
    let build = BuildLayout::new(build_root);
    let app = build.read_application_manifest()?;
    let app_type = app.type_name.clone();

    let mut manifests = Vec::with_capacity(app.service_manifest_imports.len());
    for import in &app.service_manifest_imports {
      manifests.push(ServiceManifest::new(
        build.read_service_manifest(&import.service_manifest_ref.name)?,
      ));
    }
    self
      .validator
      .validate_descriptors(&app, &manifests)
      .map_err(DigestError::from)?;

    let mut sources = vec![(
      self.layout.application_manifest(&app_type, &app.type_version),
      build.application_manifest_file(),
    )];

    let mut absent = Vec::new();
    for manifest in &manifests {
      let sm = manifest.name();
      sources.push((
        self.layout.service_manifest(&app_type, sm, &manifest.descriptor.version),
        build.service_manifest_file(sm),
      ));

      for (kind, name, version) in manifest.sub_packages() {
        let path = self.layout.sub_package(&app_type, sm, kind, name, version);
        let local = build.sub_package_dir(sm, name);
        if local.exists() {
          sources.push((path, local));
        } else {
          let optional = kind == SubPackageKind::Code
            && manifest
              .descriptor
              .code_packages
              .iter()
              .find(|c| c.name == name)
              .is_some_and(may_be_absent);
          absent.push((path, optional));
        }
      }
    }

    let items = self.checksum_sources(sources).await?;

    let witnesses = self
      .planner()
      .witnesses(absent.iter().map(|(path, _)| path.clone()).collect(), deadline)
      .await?;
    let mut reused = Vec::new();
    for (path, optional) in absent {
      match witnesses.get(&path).cloned().flatten() {
        Some(_) => reused.push(path),
        None if optional => debug!(path = %path, "container package has no folder"),
        None => {
          return Err(
            DigestError::Reference(format!("sub-package {path} is neither in the build layout nor in the store"))
              .into(),
          );
        }
      }
    }

    let summary = self.planner().sync(items, None, deadline).await?;
    info!(
      application_type = %app_type,
      type_version = %app.type_version,
      uploaded = summary.uploaded.len(),
      unchanged = summary.unchanged.len(),
      reused = reused.len(),
      "application type provisioned"
    );

    Ok(ProvisionReport {
      application_type: app_type,
      type_version: app.type_version,
      summary,
      reused,
    })
  }

  /// Checksum local artifacts in parallel; the first failure aborts the rest.
  async fn checksum_sources(&self, sources: Vec<(String, PathBuf)>) -> Result<Vec<SyncItem>, BuildError> {
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for (path, local) in sources {
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.map_err(|e| ChecksumError::Task(e.to_string()))?;
        let checksum = content_checksum_async(local.clone()).await?;
        debug!(path = %path, checksum = %checksum.as_str(), "checksummed local artifact");
        Ok::<_, ChecksumError>(SyncItem::from_path(path, local, checksum))
      });
    }

    let mut items = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(Ok(item)) => items.push(item),
        Ok(Err(e)) => {
          join_set.abort_all();
          return Err(e.into());
        }
        Err(e) => {
          join_set.abort_all();
          return Err(ChecksumError::Task(e.to_string()).into());
        }
      }
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
  }
}
