//! Test fixtures shared across modules.
//!
//! `sample_app()` imports two service manifests:
//! - `WebPkg`: one exe code package, one config and one data package, an
//!   https and an http endpoint, plus run-as, resource governance, binding,
//!   sharing and override policies on the import
//! - `StorePkg`: a stateful service group and a single exe code package

use std::collections::BTreeMap;

use crate::digest::{DigestRequest, DigestSettings, Digester};
use crate::manifest::*;
use crate::package::DigestedTree;
use crate::params::ParameterTable;
use crate::util::hash::hash_bytes;
use crate::validate::StructureValidator;
use crate::version::RolloutVersion;

pub fn user(name: &str) -> UserPrincipal {
  UserPrincipal {
    name: name.to_string(),
    ..Default::default()
  }
}

pub fn import(name: &str, policies: Vec<ImportPolicy>) -> ServiceManifestImport {
  ServiceManifestImport {
    service_manifest_ref: ManifestRef {
      name: name.to_string(),
      version: "1.0".to_string(),
    },
    policies,
    ..Default::default()
  }
}

pub fn exe_code(name: &str, version: &str) -> CodePackageDecl {
  CodePackageDecl {
    name: name.to_string(),
    version: version.to_string(),
    entry_point: EntryPoint::Exe(ExeHost {
      program: format!("{name}.exe"),
      ..Default::default()
    }),
    ..Default::default()
  }
}

pub fn container_code(name: &str, image: &str) -> CodePackageDecl {
  CodePackageDecl {
    name: name.to_string(),
    version: "1.0".to_string(),
    entry_point: EntryPoint::Container(ContainerHost {
      image_name: image.to_string(),
      ..Default::default()
    }),
    ..Default::default()
  }
}

pub fn sub_package(name: &str, version: &str) -> SubPackageDecl {
  SubPackageDecl {
    name: name.to_string(),
    version: version.to_string(),
  }
}

pub fn endpoint(name: &str, protocol: Protocol, port: u32) -> EndpointDecl {
  EndpointDecl {
    name: name.to_string(),
    protocol: Some(protocol),
    port: Some(port),
    endpoint_type: EndpointType::Input,
    ..Default::default()
  }
}

pub fn sample_app() -> ApplicationTypeDescriptor {
  let mut web = import(
    "WebPkg",
    vec![
      ImportPolicy::RunAs(RunAsPolicy {
        code_package_ref: "Code".to_string(),
        user_ref: "Admin".to_string(),
        entry_point_type: Some("Setup".to_string()),
      }),
      ImportPolicy::ResourceGovernance(ResourceGovernancePolicy {
        code_package_ref: "Code".to_string(),
        memory_in_mb: Some("[MemoryMb]".to_string()),
        ..Default::default()
      }),
      ImportPolicy::EndpointBinding(EndpointBindingPolicy {
        endpoint_ref: "Https".to_string(),
        certificate_ref: "Tls".to_string(),
      }),
      ImportPolicy::PackageSharing(PackageSharingPolicy {
        package_ref: None,
        scope: Some("Config".to_string()),
      }),
    ],
  );
  web.resource_overrides.endpoints.push(EndpointOverride {
    name: "Https".to_string(),
    port: Some("[HttpsPort]".to_string()),
    ..Default::default()
  });
  web.config_overrides.push(ConfigOverride {
    name: "Config".to_string(),
    sections: vec![ConfigSection {
      name: "Web".to_string(),
      parameters: vec![ConfigParameter {
        name: "Mode".to_string(),
        value: "[Mode]".to_string(),
        is_encrypted: None,
      }],
    }],
  });
  web.environment_overrides.push(EnvironmentOverrides {
    code_package_ref: "Code".to_string(),
    variables: vec![EnvironmentVariable {
      name: "LOG_LEVEL".to_string(),
      value: "info".to_string(),
      variable_type: None,
    }],
  });

  let param = |name: &str, value: &str| ParameterDecl {
    name: name.to_string(),
    default_value: value.to_string(),
  };

  ApplicationTypeDescriptor {
    type_name: "VotingType".to_string(),
    type_version: "1.0".to_string(),
    description: None,
    parameters: vec![
      param("InstanceCount", "1"),
      param("MemoryMb", "512"),
      param("HttpsPort", "443"),
      param("Mode", "prod"),
    ],
    service_manifest_imports: vec![web, import("StorePkg", vec![])],
    principals: Principals {
      users: vec![user("Admin"), user("Reader")],
      groups: vec![],
    },
    policies: ApplicationPolicies {
      default_run_as: Some(DefaultRunAs {
        user_ref: "Reader".to_string(),
      }),
      security_access: vec![],
    },
    certificates: Certificates {
      secrets: vec![],
      endpoint: vec![CertificateRef {
        name: "Tls".to_string(),
        x509_find_value: "ab12".to_string(),
        ..Default::default()
      }],
    },
    diagnostics: None,
    default_services: vec![DefaultService {
      name: "Web".to_string(),
      service_type_name: "WebType".to_string(),
      service_package_activation_mode: None,
      service_dns_name: Some("web.voting".to_string()),
      settings: ServiceInstanceSettings::Stateless {
        instance_count: "[InstanceCount]".to_string(),
      },
    }],
    service_templates: vec![],
  }
}

pub fn web_manifest() -> ServiceManifestDescriptor {
  let mut code = exe_code("Code", "1.0");
  code.environment_variables.push(EnvironmentVariable {
    name: "LOG_LEVEL".to_string(),
    value: "debug".to_string(),
    variable_type: None,
  });
  ServiceManifestDescriptor {
    name: "WebPkg".to_string(),
    version: "1.0".to_string(),
    description: Some("front end".to_string()),
    service_types: vec![ServiceTypeDecl::Single(ServiceType {
      service_type_name: "WebType".to_string(),
      kind: ServiceKind::Stateless,
      placement_constraints: None,
      load_metrics: vec![],
    })],
    code_packages: vec![code],
    config_packages: vec![sub_package("Config", "1.0")],
    data_packages: vec![sub_package("Data", "1.0")],
    resources: Resources {
      endpoints: vec![
        endpoint("Https", Protocol::Https, 8443),
        endpoint("Http", Protocol::Http, 8080),
      ],
    },
    diagnostics: None,
  }
}

pub fn store_manifest() -> ServiceManifestDescriptor {
  let member = |name: &str, load: u32| ServiceGroupMember {
    service_type_name: name.to_string(),
    load_metrics: vec![LoadMetric {
      name: "Items".to_string(),
      primary_default_load: load,
      secondary_default_load: 0,
      weight: None,
    }],
  };
  ServiceManifestDescriptor {
    name: "StorePkg".to_string(),
    version: "1.0".to_string(),
    description: None,
    service_types: vec![ServiceTypeDecl::Group(ServiceGroupType {
      service_group_type_name: "StoreGroup".to_string(),
      kind: ServiceKind::Stateful {
        has_persisted_state: true,
      },
      placement_constraints: None,
      load_metrics: vec![],
      members: vec![member("Primary", 2), member("Index", 3)],
    })],
    code_packages: vec![exe_code("Code", "1.0")],
    config_packages: vec![],
    data_packages: vec![],
    resources: Resources::default(),
    diagnostics: None,
  }
}

/// Wrap a descriptor with deterministic checksums for every sub-package.
pub fn with_checksums(descriptor: ServiceManifestDescriptor) -> ServiceManifest {
  let mut manifest = ServiceManifest::new(descriptor);
  manifest.checksum = Some(hash_bytes(manifest.descriptor.name.as_bytes()));
  let packages: Vec<(SubPackageKind, String, String)> = manifest
    .sub_packages()
    .into_iter()
    .map(|(kind, name, version)| (kind, name.to_string(), version.to_string()))
    .collect();
  for (kind, name, version) in packages {
    let checksum = hash_bytes(format!("{}/{kind}/{name}/{version}", manifest.descriptor.name).as_bytes());
    manifest.set_package_checksum(kind, name, checksum);
  }
  manifest
}

pub fn sample_manifests() -> Vec<ServiceManifest> {
  vec![with_checksums(web_manifest()), with_checksums(store_manifest())]
}

pub fn digest_at(
  app: &ApplicationTypeDescriptor,
  manifests: &[ServiceManifest],
  overrides: &BTreeMap<String, String>,
  version: RolloutVersion,
) -> DigestedTree {
  let params = ParameterTable::for_application(app, overrides).unwrap();
  let validator = StructureValidator;
  let digester = Digester::new(&params, DigestSettings::default(), &validator);
  let request = DigestRequest {
    application_id: "voting".to_string(),
    name_uri: "app:/voting".to_string(),
    rollout_version: version,
  };
  digester.digest(app, manifests, &request).unwrap()
}

pub fn digest_sample(version: RolloutVersion) -> DigestedTree {
  digest_at(&sample_app(), &sample_manifests(), &BTreeMap::new(), version)
}
