//! Import-scoped policy collection and per-kind merge rules.

use std::collections::BTreeMap;

use tracing::debug;

use super::{AppContext, DigestError, DigestSettings};
use crate::manifest::{
  ContainerHostPolicy, EndpointBindingPolicy, EndpointDecl, EntryPointKind, ImportPolicy, NetworkPolicies,
  PackageSharingPolicy, PortBinding, RepositoryCredentials, ResourceGovernancePolicy, RunAsPolicy,
  SecurityAccessPolicy, ServiceManifestDescriptor, ServicePackageContainerPolicy,
  ServicePackageResourceGovernancePolicy, SubPackageKind,
};
use crate::package::{
  DigestedContainerHostPolicy, DigestedPortBinding, DigestedServicePackageContainerPolicy, Isolation,
  RunAsAttachment,
};
use crate::params::{ParameterTable, ResolveParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SharingScope {
  None,
  All,
  Code,
  Config,
  Data,
}

impl SharingScope {
  fn parse(value: Option<&str>) -> Result<Self, DigestError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
      return Ok(Self::None);
    };
    match value.to_ascii_lowercase().as_str() {
      "none" => Ok(Self::None),
      "all" => Ok(Self::All),
      "code" => Ok(Self::Code),
      "config" => Ok(Self::Config),
      "data" => Ok(Self::Data),
      _ => Err(DigestError::SchemaValue(format!("invalid package sharing scope '{value}'"))),
    }
  }

  fn covers(self, kind: SubPackageKind) -> bool {
    matches!(
      (self, kind),
      (Self::All, _)
        | (Self::Code, SubPackageKind::Code)
        | (Self::Config, SubPackageKind::Config)
        | (Self::Data, SubPackageKind::Data)
    )
  }
}

/// The policies of one service manifest import, resolved and grouped by kind.
#[derive(Debug, Default)]
pub(crate) struct ImportPolicies {
  run_as: Vec<RunAsPolicy>,
  pub security_access: Vec<SecurityAccessPolicy>,
  sharing: Vec<(Option<String>, SharingScope)>,
  pub endpoint_bindings: Vec<EndpointBindingPolicy>,
  resource_governance: BTreeMap<String, ResourceGovernancePolicy>,
  container_host: BTreeMap<String, ContainerHostPolicy>,
  pub service_package_resource_governance: Option<ServicePackageResourceGovernancePolicy>,
  pub service_package_container: Option<ServicePackageContainerPolicy>,
  pub network: Option<NetworkPolicies>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str) -> Result<(), DigestError> {
  if slot.is_some() {
    return Err(DigestError::DuplicatePolicy(format!("more than one {what}")));
  }
  *slot = Some(value);
  Ok(())
}

fn insert_once<T>(map: &mut BTreeMap<String, T>, key: &str, value: T, what: &str) -> Result<(), DigestError> {
  if map.insert(key.to_string(), value).is_some() {
    return Err(DigestError::DuplicatePolicy(format!(
      "more than one {what} for code package '{key}'"
    )));
  }
  Ok(())
}

fn resolved<T: ResolveParams + Clone>(value: &T, params: &ParameterTable) -> Result<T, DigestError> {
  let mut value = value.clone();
  value.resolve_params(params)?;
  Ok(value)
}

impl ImportPolicies {
  pub fn collect(policies: &[ImportPolicy], params: &ParameterTable) -> Result<Self, DigestError> {
    let mut out = Self::default();
    for policy in policies {
      match policy {
        ImportPolicy::RunAs(p) => out.run_as.push(resolved(p, params)?),
        ImportPolicy::SecurityAccess(p) => out.security_access.push(resolved(p, params)?),
        ImportPolicy::PackageSharing(p) => {
          let p: PackageSharingPolicy = resolved(p, params)?;
          let package_ref = p.package_ref.filter(|r| !r.is_empty());
          let scope = SharingScope::parse(p.scope.as_deref())?;
          out.sharing.push((package_ref, scope));
        }
        ImportPolicy::EndpointBinding(p) => {
          let p = resolved(p, params)?;
          if out.endpoint_bindings.iter().any(|b| b.endpoint_ref == p.endpoint_ref) {
            return Err(DigestError::DuplicatePolicy(format!(
              "more than one endpoint binding policy for endpoint '{}'",
              p.endpoint_ref
            )));
          }
          out.endpoint_bindings.push(p);
        }
        ImportPolicy::ResourceGovernance(p) => {
          let p = resolved(p, params)?;
          validate_resource_governance(&p)?;
          let key = p.code_package_ref.clone();
          insert_once(&mut out.resource_governance, &key, p, "resource governance policy")?;
        }
        ImportPolicy::ContainerHost(p) => {
          let p = resolved(p, params)?;
          let key = p.code_package_ref.clone();
          insert_once(&mut out.container_host, &key, p, "container host policy")?;
        }
        ImportPolicy::ServicePackageResourceGovernance(p) => {
          let p = resolved(p, params)?;
          validate_service_package_resource_governance(&p)?;
          set_once(
            &mut out.service_package_resource_governance,
            p,
            "service package resource governance policy",
          )?;
        }
        ImportPolicy::ServicePackageContainer(p) => {
          set_once(
            &mut out.service_package_container,
            resolved(p, params)?,
            "service package container policy",
          )?;
        }
        ImportPolicy::Network(p) => set_once(&mut out.network, resolved(p, params)?, "network policies block")?,
      }
    }
    Ok(out)
  }

  /// Every policy naming a package must name one the manifest declares.
  pub fn check_package_refs(&self, manifest: &ServiceManifestDescriptor) -> Result<(), DigestError> {
    let has_code = |name: &str| manifest.code_packages.iter().any(|c| c.name == name);
    let dangling = |what: &str, name: &str| {
      DigestError::Reference(format!(
        "{what} references code package '{name}' not declared by '{}'",
        manifest.name
      ))
    };

    for p in &self.run_as {
      if !has_code(&p.code_package_ref) {
        return Err(dangling("run-as policy", &p.code_package_ref));
      }
    }
    for name in self.resource_governance.keys() {
      if !has_code(name) {
        return Err(dangling("resource governance policy", name));
      }
    }
    for name in self.container_host.keys() {
      if !has_code(name) {
        return Err(dangling("container host policy", name));
      }
    }
    for (package_ref, _) in &self.sharing {
      if let Some(name) = package_ref {
        let known = has_code(name)
          || manifest.config_packages.iter().any(|p| &p.name == name)
          || manifest.data_packages.iter().any(|p| &p.name == name);
        if !known {
          return Err(DigestError::Reference(format!(
            "package sharing policy references unknown package '{name}' in '{}'",
            manifest.name
          )));
        }
      }
    }
    Ok(())
  }

  /// At most one Main (or All) and one Setup run-as policy per code package.
  /// With none present, the application default run-as principal becomes
  /// the Main entry point's.
  pub fn run_as_for(&self, code_package: &str, ctx: &AppContext<'_>) -> Result<Vec<RunAsAttachment>, DigestError> {
    let mut main: Option<RunAsAttachment> = None;
    let mut setup: Option<RunAsAttachment> = None;

    for policy in self.run_as.iter().filter(|p| p.code_package_ref == code_package) {
      let entry_point = match policy.entry_point_type.as_deref().filter(|s| !s.is_empty()) {
        None => EntryPointKind::Main,
        Some(raw) => EntryPointKind::parse(raw)
          .ok_or_else(|| DigestError::SchemaValue(format!("invalid run-as entry point type '{raw}'")))?,
      };
      if !ctx.principals.contains(&policy.user_ref) {
        return Err(DigestError::Reference(format!(
          "run-as policy for '{code_package}' references unknown principal '{}'",
          policy.user_ref
        )));
      }
      let slot = match entry_point {
        EntryPointKind::Setup => &mut setup,
        EntryPointKind::Main | EntryPointKind::All => &mut main,
      };
      if slot.is_some() {
        return Err(DigestError::DuplicatePolicy(format!(
          "more than one {entry_point:?} run-as policy for code package '{code_package}'"
        )));
      }
      *slot = Some(RunAsAttachment {
        user_ref: policy.user_ref.clone(),
        entry_point,
      });
    }

    if main.is_none()
      && setup.is_none()
      && let Some(user) = ctx.default_run_as
    {
      debug!(code_package, user, "applying default run-as principal");
      main = Some(RunAsAttachment {
        user_ref: user.to_string(),
        entry_point: EntryPointKind::Main,
      });
    }

    Ok(main.into_iter().chain(setup).collect())
  }

  pub fn is_shared(&self, kind: SubPackageKind, name: &str) -> bool {
    self.sharing.iter().any(|(package_ref, scope)| match package_ref {
      Some(r) => r == name,
      None => scope.covers(kind),
    })
  }

  pub fn resource_governance_for(&self, code_package: &str) -> Option<ResourceGovernancePolicy> {
    self.resource_governance.get(code_package).cloned()
  }

  pub fn container_host_for(&self, code_package: &str) -> Option<&ContainerHostPolicy> {
    self.container_host.get(code_package)
  }
}

pub(crate) fn parse_bool(field: &str, value: Option<&str>, default: bool) -> Result<bool, DigestError> {
  match value.filter(|v| !v.is_empty()) {
    None => Ok(default),
    Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
    Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
    Some(v) => Err(DigestError::SchemaValue(format!("{field} must be a boolean, got '{v}'"))),
  }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, DigestError> {
  value
    .trim()
    .parse()
    .map_err(|_| DigestError::SchemaValue(format!("{field} must be numeric, got '{value}'")))
}

/// `default`, empty or absent selects the configured default.
pub(crate) fn normalize_isolation(value: Option<&str>, settings: &DigestSettings) -> Result<Isolation, DigestError> {
  match value.map(str::trim).filter(|v| !v.is_empty()) {
    None => Ok(settings.default_isolation),
    Some(v) if v.eq_ignore_ascii_case("default") => Ok(settings.default_isolation),
    Some(v) => Isolation::parse(v).ok_or_else(|| DigestError::SchemaValue(format!("invalid isolation mode '{v}'"))),
  }
}

fn validate_resource_governance(policy: &ResourceGovernancePolicy) -> Result<(), DigestError> {
  for (field, value) in policy.numeric_fields() {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
      parse_number::<u64>(field, v)?;
    }
  }
  Ok(())
}

fn validate_service_package_resource_governance(
  policy: &ServicePackageResourceGovernancePolicy,
) -> Result<(), DigestError> {
  if let Some(v) = policy.cpu_cores.as_deref().filter(|v| !v.is_empty()) {
    let cores: f64 = parse_number("cpu_cores", v)?;
    if !cores.is_finite() || cores < 0.0 {
      return Err(DigestError::SchemaValue(format!("cpu_cores must be non-negative, got '{v}'")));
    }
  }
  if let Some(v) = policy.memory_in_mb.as_deref().filter(|v| !v.is_empty()) {
    parse_number::<u64>("memory_in_mb", v)?;
  }
  Ok(())
}

fn digest_port_bindings(
  bindings: &[PortBinding],
  endpoints: &[EndpointDecl],
) -> Result<Vec<DigestedPortBinding>, DigestError> {
  bindings
    .iter()
    .map(|b| {
      if !endpoints.iter().any(|e| e.name == b.endpoint_ref) {
        return Err(DigestError::Reference(format!(
          "port binding references unknown endpoint '{}'",
          b.endpoint_ref
        )));
      }
      Ok(DigestedPortBinding {
        container_port: parse_number("container_port", &b.container_port)?,
        endpoint_ref: b.endpoint_ref.clone(),
      })
    })
    .collect()
}

const CREDENTIAL_TYPES: [&str; 3] = ["PlainText", "Encrypted", "SecretsStoreRef"];

fn digest_repository_credentials(creds: &RepositoryCredentials) -> Result<RepositoryCredentials, DigestError> {
  let credential_type = match creds.credential_type.as_deref().filter(|t| !t.is_empty()) {
    None => None,
    Some(t) => Some(
      CREDENTIAL_TYPES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(t))
        .map(|known| known.to_string())
        .ok_or_else(|| DigestError::SchemaValue(format!("invalid repository credential type '{t}'")))?,
    ),
  };
  let password_encrypted = parse_bool(
    "repository_credentials.password_encrypted",
    creds.password_encrypted.as_deref(),
    false,
  )?;
  let password_empty = creds.password.as_deref().is_none_or(str::is_empty);
  let is_plain = credential_type.as_deref().is_none_or(|t| t == "PlainText");

  if password_empty && (password_encrypted || !is_plain) {
    return Err(DigestError::SchemaValue(format!(
      "repository credentials for '{}' need a password for type {}",
      creds.account_name,
      credential_type.as_deref().unwrap_or("PlainText (encrypted)")
    )));
  }
  if password_encrypted
    && let Some(t) = credential_type.as_deref()
    && t != "Encrypted"
  {
    return Err(DigestError::SchemaValue(format!(
      "repository credentials for '{}' are marked encrypted but typed {t}",
      creds.account_name
    )));
  }

  Ok(RepositoryCredentials {
    credential_type,
    password_encrypted: Some(password_encrypted.to_string()),
    ..creds.clone()
  })
}

pub(crate) fn digest_container_host(
  policy: &ContainerHostPolicy,
  settings: &DigestSettings,
  endpoints: &[EndpointDecl],
) -> Result<DigestedContainerHostPolicy, DigestError> {
  let use_default_repository_credentials = parse_bool(
    "use_default_repository_credentials",
    policy.use_default_repository_credentials.as_deref(),
    false,
  )?;
  let use_token_authentication_credentials = parse_bool(
    "use_token_authentication_credentials",
    policy.use_token_authentication_credentials.as_deref(),
    false,
  )?;
  if use_default_repository_credentials && use_token_authentication_credentials {
    return Err(DigestError::SchemaValue(format!(
      "container host policy for '{}' enables both default repository and token authentication credentials",
      policy.code_package_ref
    )));
  }

  let mut labels: Vec<(String, String)> = Vec::with_capacity(policy.labels.len());
  for label in &policy.labels {
    if labels.iter().any(|(name, _)| name == &label.name) {
      return Err(DigestError::DuplicatePolicy(format!(
        "container label '{}' declared more than once for '{}'",
        label.name, policy.code_package_ref
      )));
    }
    labels.push((label.name.clone(), label.value.clone()));
  }

  Ok(DigestedContainerHostPolicy {
    isolation: normalize_isolation(policy.isolation.as_deref(), settings)?,
    use_default_repository_credentials,
    use_token_authentication_credentials,
    run_interactive: parse_bool("run_interactive", policy.run_interactive.as_deref(), false)?,
    containers_retention_count: match policy.containers_retention_count.as_deref().filter(|v| !v.is_empty()) {
      Some(v) => parse_number("containers_retention_count", v)?,
      None => 0,
    },
    auto_remove: parse_bool("auto_remove", policy.auto_remove.as_deref(), false)?,
    repository_credentials: policy
      .repository_credentials
      .as_ref()
      .map(digest_repository_credentials)
      .transpose()?,
    port_bindings: digest_port_bindings(&policy.port_bindings, endpoints)?,
    labels,
  })
}

pub(crate) fn digest_service_package_container(
  policy: &ServicePackageContainerPolicy,
  settings: &DigestSettings,
  endpoints: &[EndpointDecl],
) -> Result<DigestedServicePackageContainerPolicy, DigestError> {
  Ok(DigestedServicePackageContainerPolicy {
    isolation: normalize_isolation(policy.isolation.as_deref(), settings)?,
    hostname: policy.hostname.clone().filter(|h| !h.is_empty()),
    port_bindings: digest_port_bindings(&policy.port_bindings, endpoints)?,
  })
}

pub(crate) fn check_network_policies(policies: &NetworkPolicies, endpoints: &[EndpointDecl]) -> Result<(), DigestError> {
  for network in &policies.container_network_policies {
    if network.network_ref.trim().is_empty() {
      return Err(DigestError::SchemaValue("container network policy has an empty network name".to_string()));
    }
    for endpoint in &network.endpoint_bindings {
      if !endpoints.iter().any(|e| &e.name == endpoint) {
        return Err(DigestError::Reference(format!(
          "network '{}' binds unknown endpoint '{endpoint}'",
          network.network_ref
        )));
      }
    }
  }
  Ok(())
}
