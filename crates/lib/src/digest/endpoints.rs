//! Endpoint digestion: overrides, security access and https bindings.

use std::collections::BTreeSet;

use tracing::debug;

use super::policies::ImportPolicies;
use super::{AppContext, DigestError};
use crate::manifest::{
  CertificateRef, EndpointDecl, EndpointOverride, EndpointType, Protocol, SecurityAccessPolicy,
};
use crate::package::{DigestedEndpoint, DigestedResources};
use crate::params::{ParameterTable, ResolveParams};
use crate::validate::ValidationError;

fn present(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Replace only the fields the override actually carries.
fn apply_override(endpoint: &mut EndpointDecl, o: &EndpointOverride) -> Result<(), DigestError> {
  if let Some(raw) = present(&o.protocol) {
    endpoint.protocol = Some(
      Protocol::parse(raw)
        .ok_or_else(|| DigestError::SchemaValue(format!("endpoint '{}' has invalid protocol '{raw}'", o.name)))?,
    );
  }
  if let Some(raw) = present(&o.port) {
    endpoint.port = Some(
      raw
        .parse()
        .map_err(|_| DigestError::SchemaValue(format!("endpoint '{}' has invalid port '{raw}'", o.name)))?,
    );
  }
  if let Some(raw) = present(&o.endpoint_type) {
    endpoint.endpoint_type = EndpointType::parse(raw)
      .ok_or_else(|| DigestError::SchemaValue(format!("endpoint '{}' has invalid type '{raw}'", o.name)))?;
  }
  if let Some(raw) = present(&o.uri_scheme) {
    endpoint.uri_scheme = Some(raw.to_string());
  }
  if let Some(raw) = present(&o.path_suffix) {
    endpoint.path_suffix = Some(raw.to_string());
  }
  Ok(())
}

pub(crate) fn digest_resources(
  service_manifest: &str,
  declared: &[EndpointDecl],
  overrides: &[EndpointOverride],
  policies: &ImportPolicies,
  ctx: &AppContext<'_>,
  params: &ParameterTable,
) -> Result<DigestedResources, DigestError> {
  let mut resolved_overrides: Vec<EndpointOverride> = Vec::with_capacity(overrides.len());
  for o in overrides {
    if resolved_overrides.iter().any(|r| r.name == o.name) {
      return Err(DigestError::DuplicatePolicy(format!(
        "endpoint '{}' of '{service_manifest}' is overridden more than once",
        o.name
      )));
    }
    if !declared.iter().any(|e| e.name == o.name) {
      return Err(DigestError::Reference(format!(
        "endpoint override references unknown endpoint '{}' of '{service_manifest}'",
        o.name
      )));
    }
    let mut o = o.clone();
    o.resolve_params(params)?;
    resolved_overrides.push(o);
  }

  for policy in policies.security_access.iter().filter(|p| p.is_endpoint()) {
    if !declared.iter().any(|e| e.name == policy.resource_ref) {
      return Err(DigestError::Reference(format!(
        "security access policy references unknown endpoint '{}'",
        policy.resource_ref
      )));
    }
    if !ctx.principals.contains(&policy.principal_ref) {
      return Err(DigestError::Reference(format!(
        "security access policy references unknown principal '{}'",
        policy.principal_ref
      )));
    }
  }

  let mut overridden: BTreeSet<&str> = BTreeSet::new();
  let mut endpoints = Vec::with_capacity(declared.len());

  for decl in declared {
    let mut endpoint = decl.clone();
    if let Some(o) = resolved_overrides.iter().find(|o| o.name == decl.name) {
      apply_override(&mut endpoint, o)?;
      overridden.insert(decl.name.as_str());
    }

    let mut explicit = policies
      .security_access
      .iter()
      .filter(|p| p.is_endpoint() && p.resource_ref == decl.name);
    let security_access_policy = match (explicit.next(), explicit.next()) {
      (Some(_), Some(_)) => {
        return Err(DigestError::DuplicatePolicy(format!(
          "endpoint '{}' has more than one security access policy",
          decl.name
        )));
      }
      (Some(p), None) => Some(p.clone()),
      _ => ctx.default_run_as.map(|user| SecurityAccessPolicy {
        resource_ref: decl.name.clone(),
        principal_ref: user.to_string(),
        rights: "Read".to_string(),
        resource_type: "Endpoint".to_string(),
      }),
    };

    endpoints.push(DigestedEndpoint {
      endpoint,
      security_access_policy,
      endpoint_binding_policy: None,
    });
  }

  let mut certificates: Vec<CertificateRef> = Vec::new();
  for binding in &policies.endpoint_bindings {
    let Some(digested) = endpoints.iter_mut().find(|e| e.endpoint.name == binding.endpoint_ref) else {
      return Err(DigestError::Reference(format!(
        "endpoint binding policy references unknown endpoint '{}' of '{service_manifest}'",
        binding.endpoint_ref
      )));
    };

    if digested.endpoint.protocol != Some(Protocol::Https) {
      if overridden.contains(binding.endpoint_ref.as_str()) {
        debug!(
          endpoint = %binding.endpoint_ref,
          "ignoring binding policy for overridden endpoint that is not https"
        );
        continue;
      }
      return Err(DigestError::Validation(ValidationError::new(format!(
        "endpoint binding policy requires endpoint '{}' to use https",
        binding.endpoint_ref
      ))));
    }

    let certificate = ctx
      .endpoint_certificates
      .iter()
      .find(|c| c.name == binding.certificate_ref)
      .ok_or_else(|| {
        DigestError::Reference(format!(
          "endpoint binding policy references unknown certificate '{}'",
          binding.certificate_ref
        ))
      })?;
    if !certificates.iter().any(|c| c.name == certificate.name) {
      certificates.push(certificate.clone());
    }
    digested.endpoint_binding_policy = Some(binding.clone());
  }

  Ok(DigestedResources {
    endpoints,
    certificates,
    rollout_version: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::{EndpointBindingPolicy, ImportPolicy, Principals, UserPrincipal};
  use crate::params::DebugParameterTable;

  fn endpoint(name: &str, protocol: Protocol) -> EndpointDecl {
    EndpointDecl {
      name: name.to_string(),
      protocol: Some(protocol),
      port: Some(80),
      ..Default::default()
    }
  }

  fn cert(name: &str) -> CertificateRef {
    CertificateRef {
      name: name.to_string(),
      x509_find_value: "thumb".to_string(),
      ..Default::default()
    }
  }

  fn binding(endpoint: &str, cert: &str) -> ImportPolicy {
    ImportPolicy::EndpointBinding(EndpointBindingPolicy {
      endpoint_ref: endpoint.to_string(),
      certificate_ref: cert.to_string(),
    })
  }

  fn override_protocol(name: &str, protocol: &str) -> EndpointOverride {
    EndpointOverride {
      name: name.to_string(),
      protocol: Some(protocol.to_string()),
      ..Default::default()
    }
  }

  struct Fixture {
    principals: Principals,
    certs: Vec<CertificateRef>,
    debug: DebugParameterTable,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        principals: Principals {
          users: vec![UserPrincipal {
            name: "Reader".to_string(),
            ..Default::default()
          }],
          groups: vec![],
        },
        certs: vec![cert("Tls"), cert("Other")],
        debug: DebugParameterTable::default(),
      }
    }

    fn ctx(&self) -> AppContext<'_> {
      AppContext {
        principals: &self.principals,
        default_run_as: Some("Reader"),
        endpoint_certificates: &self.certs,
        debug: &self.debug,
      }
    }
  }

  fn run(
    declared: &[EndpointDecl],
    overrides: &[EndpointOverride],
    policies: &[ImportPolicy],
    params: &ParameterTable,
  ) -> Result<DigestedResources, DigestError> {
    let fixture = Fixture::new();
    let policies = ImportPolicies::collect(policies, params)?;
    digest_resources("WebPkg", declared, overrides, &policies, &fixture.ctx(), params)
  }

  #[test]
  fn override_replaces_only_present_fields() {
    let params: ParameterTable = [("Port".to_string(), "8443".to_string())].into_iter().collect();
    let o = EndpointOverride {
      name: "Web".to_string(),
      port: Some("[Port]".to_string()),
      path_suffix: Some("/api".to_string()),
      ..Default::default()
    };
    let resources = run(&[endpoint("Web", Protocol::Http)], &[o], &[], &params).unwrap();
    let digested = &resources.endpoints[0].endpoint;
    assert_eq!(digested.port, Some(8443));
    assert_eq!(digested.protocol, Some(Protocol::Http));
    assert_eq!(digested.path_suffix.as_deref(), Some("/api"));
    assert_eq!(digested.uri_scheme, None);
  }

  #[test]
  fn default_security_access_synthesized() {
    let resources = run(&[endpoint("Web", Protocol::Http)], &[], &[], &ParameterTable::new()).unwrap();
    let policy = resources.endpoints[0].security_access_policy.as_ref().unwrap();
    assert_eq!(policy.principal_ref, "Reader");
    assert_eq!(policy.rights, "Read");
  }

  #[test]
  fn https_binding_attaches_and_dedups_certificates() {
    let resources = run(
      &[endpoint("A", Protocol::Https), endpoint("B", Protocol::Https)],
      &[],
      &[binding("A", "Tls"), binding("B", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap();
    assert!(resources.endpoints.iter().all(|e| e.endpoint_binding_policy.is_some()));
    assert_eq!(resources.certificates.len(), 1);
    assert_eq!(resources.certificates[0].name, "Tls");
  }

  #[test]
  fn binding_ignored_when_overridden_away_from_https() {
    let resources = run(
      &[endpoint("Web", Protocol::Https)],
      &[override_protocol("Web", "HTTP")],
      &[binding("Web", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap();
    assert!(resources.endpoints[0].endpoint_binding_policy.is_none());
    assert!(resources.certificates.is_empty());
  }

  #[test]
  fn binding_ignored_when_overridden_http_endpoint_stays_http() {
    let o = EndpointOverride {
      name: "Web".to_string(),
      protocol: Some("http".to_string()),
      port: Some("9000".to_string()),
      ..Default::default()
    };
    let resources = run(
      &[endpoint("Web", Protocol::Http)],
      &[o],
      &[binding("Web", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap();
    assert_eq!(resources.endpoints[0].endpoint.port, Some(9000));
    assert!(resources.endpoints[0].endpoint_binding_policy.is_none());
    assert!(resources.certificates.is_empty());
  }

  #[test]
  fn binding_attached_when_overridden_to_https() {
    let resources = run(
      &[endpoint("Web", Protocol::Http)],
      &[override_protocol("Web", "https")],
      &[binding("Web", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap();
    assert!(resources.endpoints[0].endpoint_binding_policy.is_some());
  }

  #[test]
  fn binding_refs_resolve_parameters() {
    let params: ParameterTable = [
      ("Ep".to_string(), "Web".to_string()),
      ("Cert".to_string(), "Tls".to_string()),
    ]
    .into_iter()
    .collect();
    let resources = run(
      &[endpoint("Web", Protocol::Https)],
      &[],
      &[binding("[Ep]", "[Cert]")],
      &params,
    )
    .unwrap();
    let attached = resources.endpoints[0].endpoint_binding_policy.as_ref().unwrap();
    assert_eq!(attached.endpoint_ref, "Web");
    assert_eq!(attached.certificate_ref, "Tls");
    assert_eq!(resources.certificates[0].name, "Tls");
  }

  #[test]
  fn duplicate_binding_detected_after_resolution() {
    let params: ParameterTable = [("Ep".to_string(), "Web".to_string())].into_iter().collect();
    let err = run(
      &[endpoint("Web", Protocol::Https)],
      &[],
      &[binding("[Ep]", "Tls"), binding("Web", "Other")],
      &params,
    )
    .unwrap_err();
    assert!(matches!(err, DigestError::DuplicatePolicy(_)));
  }

  #[test]
  fn binding_on_plain_http_endpoint_is_error() {
    let err = run(
      &[endpoint("Web", Protocol::Http)],
      &[],
      &[binding("Web", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DigestError::Validation(_)));
  }

  #[test]
  fn binding_to_missing_endpoint_is_reference_error() {
    let err = run(
      &[endpoint("Web", Protocol::Https)],
      &[],
      &[binding("Gone", "Tls")],
      &ParameterTable::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DigestError::Reference(_)));
  }

  #[test]
  fn invalid_override_values_are_schema_errors() {
    let bad_port = EndpointOverride {
      name: "Web".to_string(),
      port: Some("eighty".to_string()),
      ..Default::default()
    };
    assert!(matches!(
      run(&[endpoint("Web", Protocol::Http)], &[bad_port], &[], &ParameterTable::new()),
      Err(DigestError::SchemaValue(_))
    ));
    assert!(matches!(
      run(
        &[endpoint("Web", Protocol::Http)],
        &[override_protocol("Web", "ftp")],
        &[],
        &ParameterTable::new()
      ),
      Err(DigestError::SchemaValue(_))
    ));
  }

  #[test]
  fn duplicate_overrides_rejected() {
    let o = override_protocol("Web", "tcp");
    assert!(matches!(
      run(&[endpoint("Web", Protocol::Http)], &[o.clone(), o], &[], &ParameterTable::new()),
      Err(DigestError::DuplicatePolicy(_))
    ));
  }
}
