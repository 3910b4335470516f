//! Manifest digestion.
//!
//! Merges an application type descriptor, its imported service manifests
//! and a parameter table into a fully resolved [`DigestedTree`]. The merge
//! order per service manifest import is:
//!
//! 1. resolve and group the import's policies by kind
//! 2. flatten service types
//! 3. digest code, config and data packages with their policy attachments
//! 4. digest endpoint resources
//! 5. attach service-package level policies
//!
//! After the whole tree passes validation, every document's checksum is
//! computed on its unversioned form and only then are versions stamped.
//! Any error aborts the call; no partial tree is returned.

mod endpoints;
mod instance;
mod policies;
mod service_types;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

pub use instance::{InstanceMeta, build_instance};

use crate::manifest::{
  ApplicationTypeDescriptor, CertificateRef, CodePackageDecl, ConfigOverride, EnvironmentOverrides, Principals,
  ServiceManifest, ServiceManifestImport, SubPackageDecl, SubPackageKind,
};
use crate::package::{
  ApplicationPackage, DigestedCertificates, DigestedCodePackage, DigestedConfigPackage, DigestedDataPackage,
  DigestedEnvironment, DigestedServiceTypes, DigestedTree, Digested, Isolation, ServicePackage,
};
use crate::params::{DebugParameterTable, ParameterError, ParameterTable, ResolveParams};
use crate::util::hash::HashError;
use crate::validate::{ValidationError, Validator};
use crate::version::RolloutVersion;

use policies::{ImportPolicies, check_network_policies, digest_container_host, digest_service_package_container};

#[derive(Debug, Error)]
pub enum DigestError {
  /// A name refers to something no layer declares.
  #[error("reference error: {0}")]
  Reference(String),

  /// Two policies target the same attachment point.
  #[error("duplicate policy: {0}")]
  DuplicatePolicy(String),

  /// A scalar could not be read as the type it must have.
  #[error("invalid value: {0}")]
  SchemaValue(String),

  #[error("validation failed: {0}")]
  Validation(#[from] ValidationError),

  #[error("checksum computation failed: {0}")]
  Checksum(#[from] HashError),
}

impl From<ParameterError> for DigestError {
  fn from(err: ParameterError) -> Self {
    match err {
      ParameterError::Unresolved { .. } | ParameterError::Undeclared { .. } => DigestError::Reference(err.to_string()),
      ParameterError::MalformedDebug { .. } => DigestError::SchemaValue(err.to_string()),
    }
  }
}

/// Settings injected into the digester by its caller.
#[derive(Debug, Clone, Copy)]
pub struct DigestSettings {
  /// Isolation used when a container policy asks for `default` or none.
  pub default_isolation: Isolation,
}

impl Default for DigestSettings {
  fn default() -> Self {
    Self {
      default_isolation: Isolation::Process,
    }
  }
}

/// Identity and version of the tree being produced.
#[derive(Debug, Clone)]
pub struct DigestRequest {
  pub application_id: String,
  pub name_uri: String,
  pub rollout_version: RolloutVersion,
}

/// Application-level state shared by every service manifest import.
pub(crate) struct AppContext<'a> {
  principals: &'a Principals,
  default_run_as: Option<&'a str>,
  endpoint_certificates: &'a [CertificateRef],
  debug: &'a DebugParameterTable,
}

pub struct Digester<'a> {
  params: &'a ParameterTable,
  settings: DigestSettings,
  validator: &'a dyn Validator,
}

fn resolved<T: ResolveParams + Clone>(value: &T, params: &ParameterTable) -> Result<T, DigestError> {
  let mut value = value.clone();
  value.resolve_params(params)?;
  Ok(value)
}

const ENVIRONMENT_VARIABLE_TYPES: [&str; 3] = ["PlainText", "Encrypted", "SecretsStoreRef"];

impl<'a> Digester<'a> {
  pub fn new(params: &'a ParameterTable, settings: DigestSettings, validator: &'a dyn Validator) -> Self {
    Self {
      params,
      settings,
      validator,
    }
  }

  /// Digest `app` and `manifests` into a tree stamped with `request.rollout_version`.
  pub fn digest(
    &self,
    app: &ApplicationTypeDescriptor,
    manifests: &[ServiceManifest],
    request: &DigestRequest,
  ) -> Result<DigestedTree, DigestError> {
    self.validator.validate_descriptors(app, manifests)?;

    let debug = self.params.debug_parameters()?;
    let principals = resolved(&app.principals, self.params)?;
    let policies = resolved(&app.policies, self.params)?;
    let certificates = resolved(&app.certificates, self.params)?;
    let diagnostics = resolved(&app.diagnostics, self.params)?;

    let default_run_as = policies.default_run_as.as_ref().map(|d| d.user_ref.as_str());
    if let Some(user) = default_run_as
      && !principals.contains(user)
    {
      return Err(DigestError::Reference(format!(
        "default run-as policy references unknown principal '{user}'"
      )));
    }
    if let Some(p) = policies.security_access.iter().find(|p| !principals.contains(&p.principal_ref)) {
      return Err(DigestError::Reference(format!(
        "security access policy references unknown principal '{}'",
        p.principal_ref
      )));
    }

    let ctx = AppContext {
      principals: &principals,
      default_run_as,
      endpoint_certificates: &certificates.endpoint,
      debug: &debug,
    };

    let mut services = Vec::with_capacity(app.service_manifest_imports.len());
    for import in &app.service_manifest_imports {
      let name = &import.service_manifest_ref.name;
      let manifest = manifests.iter().find(|m| m.name() == name).ok_or_else(|| {
        DigestError::Reference(format!("no service manifest named '{name}' was supplied"))
      })?;
      services.push(self.digest_service(import, manifest, &ctx)?);
    }

    let mut tree = DigestedTree {
      application: ApplicationPackage {
        application_type_name: app.type_name.clone(),
        application_id: request.application_id.clone(),
        name_uri: request.name_uri.clone(),
        rollout_version: None,
        content_checksum: None,
        digested_environment: DigestedEnvironment {
          principals: principals.clone(),
          policies: policies.clone(),
          diagnostics,
          rollout_version: None,
        },
        digested_certificates: DigestedCertificates {
          secrets: certificates.secrets.clone(),
          endpoint: certificates.endpoint.clone(),
          rollout_version: None,
        },
      },
      services,
    };

    self.validator.validate_digested(&tree)?;

    tree.application.content_checksum = Some(tree.application.compute_checksum()?);
    for service in &mut tree.services {
      service.content_checksum = Some(service.compute_checksum()?);
    }

    tree.application.stamp(request.rollout_version);
    for service in &mut tree.services {
      service.stamp(request.rollout_version);
      info!(
        service_package = %service.name,
        version = %request.rollout_version,
        checksum = %service.content_checksum.as_ref().map(|c| c.0.as_str()).unwrap_or_default(),
        "digested service package"
      );
    }

    info!(
      application_type = %app.type_name,
      application_id = %request.application_id,
      version = %request.rollout_version,
      services = tree.services.len(),
      "digested application package"
    );

    Ok(tree)
  }

  fn digest_service(
    &self,
    import: &ServiceManifestImport,
    manifest: &ServiceManifest,
    ctx: &AppContext<'_>,
  ) -> Result<ServicePackage, DigestError> {
    let descriptor = &manifest.descriptor;
    let sm = descriptor.name.as_str();
    let endpoints = &descriptor.resources.endpoints;

    let policies = ImportPolicies::collect(&import.policies, self.params)?;
    policies.check_package_refs(descriptor)?;

    let service_types = descriptor
      .service_types
      .iter()
      .map(|t| service_types::flatten(t, self.params))
      .collect::<Result<Vec<_>, _>>()?;

    let environment = environment_overrides(sm, &import.environment_overrides, &descriptor.code_packages)?;
    let digested_code_packages = descriptor
      .code_packages
      .iter()
      .map(|decl| {
        self.digest_code_package(
          decl,
          manifest,
          &policies,
          environment.get(decl.name.as_str()).copied(),
          ctx,
        )
      })
      .collect::<Result<Vec<_>, _>>()?;

    let config_overrides = config_overrides(sm, &import.config_overrides, &descriptor.config_packages)?;
    let digested_config_packages = descriptor
      .config_packages
      .iter()
      .map(|decl| {
        let config_override = config_overrides
          .get(decl.name.as_str())
          .map(|o| resolved(*o, self.params))
          .transpose()?;
        Ok(DigestedConfigPackage {
          config_package: decl.clone(),
          rollout_version: None,
          content_checksum: manifest.package_checksum(SubPackageKind::Config, &decl.name).cloned(),
          is_shared: policies.is_shared(SubPackageKind::Config, &decl.name),
          config_override,
          debug_parameters: ctx.debug.find(sm, SubPackageKind::Config, &decl.name).cloned(),
        })
      })
      .collect::<Result<Vec<_>, DigestError>>()?;

    let digested_data_packages = descriptor
      .data_packages
      .iter()
      .map(|decl: &SubPackageDecl| DigestedDataPackage {
        data_package: decl.clone(),
        rollout_version: None,
        content_checksum: manifest.package_checksum(SubPackageKind::Data, &decl.name).cloned(),
        is_shared: policies.is_shared(SubPackageKind::Data, &decl.name),
        debug_parameters: ctx.debug.find(sm, SubPackageKind::Data, &decl.name).cloned(),
      })
      .collect();

    let digested_resources = endpoints::digest_resources(
      sm,
      endpoints,
      &import.resource_overrides.endpoints,
      &policies,
      ctx,
      self.params,
    )?;

    let container_policy = policies
      .service_package_container
      .as_ref()
      .map(|p| digest_service_package_container(p, &self.settings, endpoints))
      .transpose()?;

    if let Some(network) = &policies.network {
      check_network_policies(network, endpoints)?;
    }

    let diagnostics = resolved(&descriptor.diagnostics, self.params)?;

    debug!(
      service_manifest = sm,
      code_packages = descriptor.code_packages.len(),
      config_packages = descriptor.config_packages.len(),
      data_packages = descriptor.data_packages.len(),
      endpoints = endpoints.len(),
      "merged service manifest import"
    );

    Ok(ServicePackage {
      name: descriptor.name.clone(),
      manifest_version: descriptor.version.clone(),
      manifest_checksum: manifest.checksum.clone(),
      description: descriptor.description.clone(),
      rollout_version: None,
      content_checksum: None,
      resource_governance: policies.service_package_resource_governance.clone(),
      container_policy,
      network_policies: policies.network.clone(),
      digested_service_types: DigestedServiceTypes {
        service_types,
        rollout_version: None,
      },
      digested_code_packages,
      digested_config_packages,
      digested_data_packages,
      digested_resources,
      diagnostics,
    })
  }

  fn digest_code_package(
    &self,
    decl: &CodePackageDecl,
    manifest: &ServiceManifest,
    policies: &ImportPolicies,
    environment: Option<&EnvironmentOverrides>,
    ctx: &AppContext<'_>,
  ) -> Result<DigestedCodePackage, DigestError> {
    let sm = manifest.name();
    let mut code_package = resolved(decl, self.params)?;
    if let Some(overrides) = environment {
      apply_environment_overrides(&mut code_package, overrides, self.params)?;
    }

    let container_host_policy = policies
      .container_host_for(&decl.name)
      .map(|p| digest_container_host(p, &self.settings, &manifest.descriptor.resources.endpoints))
      .transpose()?;

    Ok(DigestedCodePackage {
      run_as_policies: policies.run_as_for(&decl.name, ctx)?,
      resource_governance: policies.resource_governance_for(&decl.name),
      container_host_policy,
      is_shared: policies.is_shared(SubPackageKind::Code, &decl.name),
      debug_parameters: ctx.debug.find(sm, SubPackageKind::Code, &decl.name).cloned(),
      content_checksum: manifest.package_checksum(SubPackageKind::Code, &decl.name).cloned(),
      rollout_version: None,
      code_package,
    })
  }
}

fn environment_overrides<'i>(
  sm: &str,
  overrides: &'i [EnvironmentOverrides],
  code_packages: &[CodePackageDecl],
) -> Result<BTreeMap<&'i str, &'i EnvironmentOverrides>, DigestError> {
  let mut by_package = BTreeMap::new();
  for o in overrides {
    if !code_packages.iter().any(|c| c.name == o.code_package_ref) {
      return Err(DigestError::Reference(format!(
        "environment overrides reference unknown code package '{}' of '{sm}'",
        o.code_package_ref
      )));
    }
    if by_package.insert(o.code_package_ref.as_str(), o).is_some() {
      return Err(DigestError::DuplicatePolicy(format!(
        "more than one environment overrides block for code package '{}'",
        o.code_package_ref
      )));
    }
  }
  Ok(by_package)
}

fn apply_environment_overrides(
  code_package: &mut CodePackageDecl,
  overrides: &EnvironmentOverrides,
  params: &ParameterTable,
) -> Result<(), DigestError> {
  for variable in &overrides.variables {
    let variable = resolved(variable, params)?;
    let declared = code_package
      .environment_variables
      .iter_mut()
      .find(|v| v.name == variable.name)
      .ok_or_else(|| {
        DigestError::Reference(format!(
          "environment override '{}' is not declared by code package '{}'",
          variable.name, code_package.name
        ))
      })?;
    declared.value = variable.value;
    if let Some(raw) = variable.variable_type.as_deref().filter(|t| !t.is_empty()) {
      let normalized = ENVIRONMENT_VARIABLE_TYPES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(raw))
        .ok_or_else(|| DigestError::SchemaValue(format!("invalid environment variable type '{raw}'")))?;
      declared.variable_type = Some(normalized.to_string());
    }
  }
  Ok(())
}

fn config_overrides<'i>(
  sm: &str,
  overrides: &'i [ConfigOverride],
  config_packages: &[SubPackageDecl],
) -> Result<BTreeMap<&'i str, &'i ConfigOverride>, DigestError> {
  let mut by_name = BTreeMap::new();
  for o in overrides {
    if !config_packages.iter().any(|c| c.name == o.name) {
      return Err(DigestError::Reference(format!(
        "config override references unknown config package '{}' of '{sm}'",
        o.name
      )));
    }
    if by_name.insert(o.name.as_str(), o).is_some() {
      return Err(DigestError::DuplicatePolicy(format!(
        "more than one config override for config package '{}'",
        o.name
      )));
    }
  }
  Ok(by_name)
}
