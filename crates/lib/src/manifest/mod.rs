//! Manifest descriptors and build-layout loading.
//!
//! An application type manifest imports several service manifests; each
//! service manifest declares service types, code/config/data sub-packages
//! and endpoint resources. Descriptors are read once per digestion call and
//! never mutated afterwards.
//!
//! A local build layout looks like:
//!
//! ```text
//! <build>/ApplicationManifest.json
//! <build>/<ServiceManifestName>/ServiceManifest.json
//! <build>/<ServiceManifestName>/<PackageName>/...
//! ```

mod application;
mod policy;
mod service;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use application::*;
pub use policy::*;
pub use service::*;

use crate::consts::{APPLICATION_MANIFEST_FILE, SERVICE_MANIFEST_FILE};
use crate::util::hash::ContentHash;

/// The three kinds of independently versioned sub-packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubPackageKind {
  Code,
  Config,
  Data,
}

impl std::fmt::Display for SubPackageKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      SubPackageKind::Code => "Code",
      SubPackageKind::Config => "Config",
      SubPackageKind::Data => "Data",
    };
    write!(f, "{}", name)
  }
}

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest {origin}: {source}")]
  Parse {
    origin: String,
    #[source]
    source: serde_json::Error,
  },
}

/// A service manifest descriptor together with the checksums of its
/// manifest document and of each sub-package's content.
///
/// Checksums are absent until the build layout or the store has been consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceManifest {
  pub descriptor: ServiceManifestDescriptor,
  pub checksum: Option<ContentHash>,
  package_checksums: BTreeMap<(SubPackageKind, String), ContentHash>,
}

impl ServiceManifest {
  pub fn new(descriptor: ServiceManifestDescriptor) -> Self {
    Self {
      descriptor,
      checksum: None,
      package_checksums: BTreeMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.descriptor.name
  }

  pub fn set_package_checksum(&mut self, kind: SubPackageKind, name: impl Into<String>, checksum: ContentHash) {
    self.package_checksums.insert((kind, name.into()), checksum);
  }

  pub fn package_checksum(&self, kind: SubPackageKind, name: &str) -> Option<&ContentHash> {
    self.package_checksums.get(&(kind, name.to_string()))
  }

  /// Every declared sub-package as `(kind, name, version)`.
  pub fn sub_packages(&self) -> Vec<(SubPackageKind, &str, &str)> {
    let d = &self.descriptor;
    d.code_packages
      .iter()
      .map(|p| (SubPackageKind::Code, p.name.as_str(), p.version.as_str()))
      .chain(
        d.config_packages
          .iter()
          .map(|p| (SubPackageKind::Config, p.name.as_str(), p.version.as_str())),
      )
      .chain(
        d.data_packages
          .iter()
          .map(|p| (SubPackageKind::Data, p.name.as_str(), p.version.as_str())),
      )
      .collect()
  }
}

pub fn parse_application_manifest(bytes: &[u8], origin: &str) -> Result<ApplicationTypeDescriptor, ManifestError> {
  serde_json::from_slice(bytes).map_err(|source| ManifestError::Parse {
    origin: origin.to_string(),
    source,
  })
}

pub fn parse_service_manifest(bytes: &[u8], origin: &str) -> Result<ServiceManifestDescriptor, ManifestError> {
  serde_json::from_slice(bytes).map_err(|source| ManifestError::Parse {
    origin: origin.to_string(),
    source,
  })
}

fn read(path: &Path) -> Result<Vec<u8>, ManifestError> {
  std::fs::read(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })
}

/// Paths inside a local build layout.
#[derive(Debug, Clone)]
pub struct BuildLayout {
  root: PathBuf,
}

impl BuildLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn application_manifest_file(&self) -> PathBuf {
    self.root.join(APPLICATION_MANIFEST_FILE)
  }

  pub fn service_manifest_file(&self, service_manifest: &str) -> PathBuf {
    self.root.join(service_manifest).join(SERVICE_MANIFEST_FILE)
  }

  pub fn sub_package_dir(&self, service_manifest: &str, package: &str) -> PathBuf {
    self.root.join(service_manifest).join(package)
  }

  pub fn read_application_manifest(&self) -> Result<ApplicationTypeDescriptor, ManifestError> {
    let path = self.application_manifest_file();
    parse_application_manifest(&read(&path)?, &path.display().to_string())
  }

  pub fn read_service_manifest(&self, service_manifest: &str) -> Result<ServiceManifestDescriptor, ManifestError> {
    let path = self.service_manifest_file(service_manifest);
    parse_service_manifest(&read(&path)?, &path.display().to_string())
  }
}
