//! Pluggable validation invoked by the digester.
//!
//! Referential and syntactic checks live behind the [`Validator`] trait so
//! callers can add their own. [`StructureValidator`] covers the checks the
//! digester itself relies on: non-empty identities, unique names, and names
//! that are safe to embed in store paths.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::manifest::{ApplicationTypeDescriptor, ServiceManifest};
use crate::package::DigestedTree;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
  pub message: String,
}

impl ValidationError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

pub trait Validator: Send + Sync {
  /// Checks run on the raw descriptors before merging.
  fn validate_descriptors(
    &self,
    app: &ApplicationTypeDescriptor,
    manifests: &[ServiceManifest],
  ) -> Result<(), ValidationError>;

  /// Checks run on the merged tree before checksums are computed.
  fn validate_digested(&self, _tree: &DigestedTree) -> Result<(), ValidationError> {
    Ok(())
  }
}

/// Runs validators in order; the first failure wins.
#[derive(Default)]
pub struct ValidatorChain {
  validators: Vec<Box<dyn Validator>>,
}

impl ValidatorChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, validator: impl Validator + 'static) -> Self {
    self.validators.push(Box::new(validator));
    self
  }

  pub fn len(&self) -> usize {
    self.validators.len()
  }

  pub fn is_empty(&self) -> bool {
    self.validators.is_empty()
  }
}

impl Validator for ValidatorChain {
  fn validate_descriptors(
    &self,
    app: &ApplicationTypeDescriptor,
    manifests: &[ServiceManifest],
  ) -> Result<(), ValidationError> {
    self
      .validators
      .iter()
      .try_for_each(|v| v.validate_descriptors(app, manifests))
  }

  fn validate_digested(&self, tree: &DigestedTree) -> Result<(), ValidationError> {
    self.validators.iter().try_for_each(|v| v.validate_digested(tree))
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StructureValidator;

fn check_name(what: &str, name: &str) -> Result<(), ValidationError> {
  if name.trim().is_empty() {
    return Err(ValidationError::new(format!("{what} name is empty")));
  }
  if name.contains(['/', '\\']) || name == "." || name == ".." {
    return Err(ValidationError::new(format!("{what} name '{name}' is not a valid path segment")));
  }
  Ok(())
}

fn check_unique<'a>(what: &str, names: impl IntoIterator<Item = &'a str>) -> Result<(), ValidationError> {
  let mut seen = BTreeSet::new();
  for name in names {
    check_name(what, name)?;
    if !seen.insert(name) {
      return Err(ValidationError::new(format!("duplicate {what} '{name}'")));
    }
  }
  Ok(())
}

impl Validator for StructureValidator {
  fn validate_descriptors(
    &self,
    app: &ApplicationTypeDescriptor,
    manifests: &[ServiceManifest],
  ) -> Result<(), ValidationError> {
    check_name("application type", &app.type_name)?;
    if app.type_version.trim().is_empty() {
      return Err(ValidationError::new("application type version is empty"));
    }
    check_unique(
      "service manifest import",
      app
        .service_manifest_imports
        .iter()
        .map(|i| i.service_manifest_ref.name.as_str()),
    )?;
    check_unique("parameter", app.parameters.iter().map(|p| p.name.as_str()))?;

    for import in &app.service_manifest_imports {
      let wanted = &import.service_manifest_ref;
      if let Some(found) = manifests.iter().find(|m| m.name() == wanted.name)
        && found.descriptor.version != wanted.version
      {
        return Err(ValidationError::new(format!(
          "'{}' is imported at version {} but the supplied manifest is version {}",
          wanted.name, wanted.version, found.descriptor.version
        )));
      }
    }

    for manifest in manifests {
      let d = &manifest.descriptor;
      check_name("service manifest", &d.name)?;
      if d.version.trim().is_empty() {
        return Err(ValidationError::new(format!("service manifest '{}' has no version", d.name)));
      }
      check_unique("service type", d.service_types.iter().map(|t| t.name()))?;
      check_unique("code package", d.code_packages.iter().map(|p| p.name.as_str()))?;
      check_unique("config package", d.config_packages.iter().map(|p| p.name.as_str()))?;
      check_unique("data package", d.data_packages.iter().map(|p| p.name.as_str()))?;
      check_unique("endpoint", d.resources.endpoints.iter().map(|e| e.name.as_str()))?;
      for (kind, name, version) in manifest.sub_packages() {
        if version.trim().is_empty() {
          return Err(ValidationError::new(format!(
            "{kind} package '{name}' of '{}' has no version",
            d.name
          )));
        }
      }
    }
    Ok(())
  }

  fn validate_digested(&self, tree: &DigestedTree) -> Result<(), ValidationError> {
    check_unique("service package", tree.services.iter().map(|s| s.name.as_str()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{ManifestRef, ServiceManifestDescriptor, ServiceManifestImport, SubPackageDecl};

  fn app(imports: &[&str]) -> ApplicationTypeDescriptor {
    ApplicationTypeDescriptor {
      type_name: "App".to_string(),
      type_version: "1.0".to_string(),
      service_manifest_imports: imports
        .iter()
        .map(|n| ServiceManifestImport {
          service_manifest_ref: ManifestRef {
            name: n.to_string(),
            version: "1.0".to_string(),
          },
          ..Default::default()
        })
        .collect(),
      ..Default::default()
    }
  }

  struct Reject;

  impl Validator for Reject {
    fn validate_descriptors(&self, _: &ApplicationTypeDescriptor, _: &[ServiceManifest]) -> Result<(), ValidationError> {
      Err(ValidationError::new("rejected"))
    }
  }

  #[test]
  fn duplicate_imports_rejected() {
    let err = StructureValidator.validate_descriptors(&app(&["A", "A"]), &[]).unwrap_err();
    assert!(err.message.contains("duplicate service manifest import"));
  }

  #[test]
  fn duplicate_sub_packages_rejected() {
    let manifest = ServiceManifest::new(ServiceManifestDescriptor {
      name: "A".to_string(),
      version: "1.0".to_string(),
      config_packages: vec![
        SubPackageDecl {
          name: "Config".to_string(),
          version: "1.0".to_string(),
        },
        SubPackageDecl {
          name: "Config".to_string(),
          version: "2.0".to_string(),
        },
      ],
      ..Default::default()
    });
    assert!(StructureValidator.validate_descriptors(&app(&["A"]), &[manifest]).is_err());
  }

  #[test]
  fn path_unsafe_names_rejected() {
    assert!(StructureValidator.validate_descriptors(&app(&["../x"]), &[]).is_err());
  }

  #[test]
  fn chain_stops_at_first_failure() {
    let chain = ValidatorChain::new().with(StructureValidator).with(Reject);
    assert_eq!(chain.len(), 2);
    let err = chain.validate_descriptors(&app(&["A"]), &[]).unwrap_err();
    assert_eq!(err.message, "rejected");
    assert!(ValidatorChain::new().validate_descriptors(&app(&["A"]), &[]).is_ok());
  }
}
