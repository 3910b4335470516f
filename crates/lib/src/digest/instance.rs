//! Application instance document assembly.

use std::collections::BTreeMap;

use super::DigestError;
use crate::manifest::{ApplicationTypeDescriptor, ServiceInstanceSettings};
use crate::package::{
  ActivationMode, ApplicationInstance, DigestedDefaultService, DigestedInstanceSettings, DigestedServiceTemplate,
  DigestedTree, ServicePackageRef,
};
use crate::params::ParameterTable;

/// Identity of the instance being written.
#[derive(Debug, Clone)]
pub struct InstanceMeta {
  pub application_id: String,
  pub name_uri: String,
  pub instance_version: u64,
  pub parameters: BTreeMap<String, String>,
}

fn resolve_opt(params: &ParameterTable, value: &Option<String>) -> Result<Option<String>, DigestError> {
  value.as_deref().map(|v| params.resolve(v)).transpose().map_err(DigestError::from)
}

fn activation_mode(params: &ParameterTable, raw: &Option<String>) -> Result<ActivationMode, DigestError> {
  match resolve_opt(params, raw)?.filter(|v| !v.is_empty()) {
    None => Ok(ActivationMode::SharedProcess),
    Some(v) => ActivationMode::parse(&v)
      .ok_or_else(|| DigestError::SchemaValue(format!("invalid service package activation mode '{v}'"))),
  }
}

fn number<T: std::str::FromStr>(params: &ParameterTable, field: &str, raw: &str) -> Result<T, DigestError> {
  let value = params.resolve(raw)?;
  value
    .trim()
    .parse()
    .map_err(|_| DigestError::SchemaValue(format!("{field} must be numeric, got '{value}'")))
}

fn settings(params: &ParameterTable, raw: &ServiceInstanceSettings) -> Result<DigestedInstanceSettings, DigestError> {
  Ok(match raw {
    ServiceInstanceSettings::Stateless { instance_count } => DigestedInstanceSettings::Stateless {
      instance_count: number(params, "instance_count", instance_count)?,
    },
    ServiceInstanceSettings::Stateful {
      target_replica_set_size,
      min_replica_set_size,
    } => DigestedInstanceSettings::Stateful {
      target_replica_set_size: number(params, "target_replica_set_size", target_replica_set_size)?,
      min_replica_set_size: number(params, "min_replica_set_size", min_replica_set_size)?,
    },
  })
}

fn check_service_type(tree: &DigestedTree, name: &str) -> Result<(), DigestError> {
  let declared = tree.services.iter().any(|s| {
    s.digested_service_types
      .service_types
      .iter()
      .any(|t| t.service_type_name == name)
  });
  if declared {
    Ok(())
  } else {
    Err(DigestError::Reference(format!(
      "default service references unknown service type '{name}'"
    )))
  }
}

/// Build the instance document for a versioned tree.
pub fn build_instance(
  app: &ApplicationTypeDescriptor,
  params: &ParameterTable,
  tree: &DigestedTree,
  meta: InstanceMeta,
) -> Result<ApplicationInstance, DigestError> {
  let application_package_ref = tree
    .application
    .rollout_version
    .ok_or_else(|| DigestError::Reference("application package has no rollout version".to_string()))?;

  let service_package_refs = tree
    .services
    .iter()
    .map(|s| {
      s.rollout_version
        .map(|rollout_version| ServicePackageRef {
          name: s.name.clone(),
          rollout_version,
        })
        .ok_or_else(|| DigestError::Reference(format!("service package '{}' has no rollout version", s.name)))
    })
    .collect::<Result<Vec<_>, _>>()?;

  let default_services = app
    .default_services
    .iter()
    .map(|svc| {
      check_service_type(tree, &svc.service_type_name)?;
      Ok(DigestedDefaultService {
        name: svc.name.clone(),
        service_type_name: svc.service_type_name.clone(),
        activation_mode: activation_mode(params, &svc.service_package_activation_mode)?,
        service_dns_name: resolve_opt(params, &svc.service_dns_name)?.filter(|v| !v.is_empty()),
        settings: settings(params, &svc.settings)?,
      })
    })
    .collect::<Result<Vec<_>, DigestError>>()?;

  let service_templates = app
    .service_templates
    .iter()
    .map(|tpl| {
      check_service_type(tree, &tpl.service_type_name)?;
      Ok(DigestedServiceTemplate {
        service_type_name: tpl.service_type_name.clone(),
        activation_mode: activation_mode(params, &tpl.service_package_activation_mode)?,
        settings: settings(params, &tpl.settings)?,
      })
    })
    .collect::<Result<Vec<_>, DigestError>>()?;

  Ok(ApplicationInstance {
    application_id: meta.application_id,
    application_type_name: app.type_name.clone(),
    application_type_version: app.type_version.clone(),
    name_uri: meta.name_uri,
    instance_version: meta.instance_version,
    parameters: meta.parameters,
    application_package_ref,
    service_package_refs,
    default_services,
    service_templates,
  })
}
