//! Parameter resolution.
//!
//! Manifest fields may refer to application parameters with a bracketed
//! reference: a value is a reference iff it is longer than two characters,
//! starts with `[` and ends with `]`. The inner name is looked up in the
//! [`ParameterTable`]; a miss is an error for every field the resolver is
//! applied to.
//!
//! Resolution is driven by a field list per type (see `resolve_fields!`)
//! rather than by hand-written code per type, so only the fields named in
//! the list are touched. Fields left out of a list keep their raw value,
//! which lets a reference survive until instantiation time.
//!
//! # Example
//!
//! ```
//! use pkgdigest_lib::params::ParameterTable;
//!
//! let table: ParameterTable = [("InstanceCount".to_string(), "3".to_string())].into_iter().collect();
//! assert_eq!(table.resolve("[InstanceCount]").unwrap(), "3");
//! assert_eq!(table.resolve("literal").unwrap(), "literal");
//! assert!(table.resolve("[Missing]").is_err());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::consts::DEBUG_PARAMS_KEY;
use crate::manifest::{ApplicationTypeDescriptor, EntryPointKind, SubPackageKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
  #[error("parameter '{name}' is referenced but has no value")]
  Unresolved { name: String },

  #[error("parameter '{name}' is not declared by the application manifest")]
  Undeclared { name: String },

  #[error("malformed debug parameters: {message}")]
  MalformedDebug { message: String },
}

/// Flat mapping from parameter name to string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTable(BTreeMap<String, String>);

impl ParameterTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the effective table for an application: manifest defaults overlaid
  /// with caller-supplied values.
  ///
  /// Supplying a value for an undeclared parameter is an error, except for
  /// the reserved debug parameter key.
  pub fn for_application(
    app: &ApplicationTypeDescriptor,
    overrides: &BTreeMap<String, String>,
  ) -> Result<Self, ParameterError> {
    let mut table: BTreeMap<String, String> = app
      .parameters
      .iter()
      .map(|p| (p.name.clone(), p.default_value.clone()))
      .collect();

    for (name, value) in overrides {
      if name != DEBUG_PARAMS_KEY && !table.contains_key(name) {
        return Err(ParameterError::Undeclared { name: name.clone() });
      }
      table.insert(name.clone(), value.clone());
    }

    Ok(Self(table))
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
    self.0.insert(name.into(), value.into())
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }

  /// Resolve a single value.
  pub fn resolve(&self, value: &str) -> Result<String, ParameterError> {
    match reference_name(value) {
      Some(name) => self
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| ParameterError::Unresolved { name: name.to_string() }),
      None => Ok(value.to_string()),
    }
  }

  /// Parse the debug parameter overlay carried under the reserved key.
  ///
  /// An absent or empty value yields an empty overlay.
  pub fn debug_parameters(&self) -> Result<DebugParameterTable, ParameterError> {
    match self.get(DEBUG_PARAMS_KEY) {
      Some(raw) if !raw.trim().is_empty() => DebugParameterTable::parse(raw),
      _ => Ok(DebugParameterTable::default()),
    }
  }
}

impl FromIterator<(String, String)> for ParameterTable {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Returns the referenced parameter name if `value` is a bracketed reference.
pub fn reference_name(value: &str) -> Option<&str> {
  if value.len() > 2 && value.starts_with('[') && value.ends_with(']') {
    Some(&value[1..value.len() - 1])
  } else {
    None
  }
}

/// Resolve every parameter-bearing leaf of a value in place.
pub trait ResolveParams {
  fn resolve_params(&mut self, table: &ParameterTable) -> Result<(), ParameterError>;
}

impl ResolveParams for String {
  fn resolve_params(&mut self, table: &ParameterTable) -> Result<(), ParameterError> {
    if reference_name(self).is_some() {
      *self = table.resolve(self)?;
    }
    Ok(())
  }
}

impl<T: ResolveParams> ResolveParams for Option<T> {
  fn resolve_params(&mut self, table: &ParameterTable) -> Result<(), ParameterError> {
    match self {
      Some(inner) => inner.resolve_params(table),
      None => Ok(()),
    }
  }
}

impl<T: ResolveParams> ResolveParams for Vec<T> {
  fn resolve_params(&mut self, table: &ParameterTable) -> Result<(), ParameterError> {
    self.iter_mut().try_for_each(|item| item.resolve_params(table))
  }
}

/// Implement [`ResolveParams`] for a struct from the list of fields to resolve.
macro_rules! resolve_fields {
  ($ty:ty { $($field:ident),* $(,)? }) => {
    impl $crate::params::ResolveParams for $ty {
      fn resolve_params(
        &mut self,
        table: &$crate::params::ParameterTable,
      ) -> Result<(), $crate::params::ParameterError> {
        $( $crate::params::ResolveParams::resolve_params(&mut self.$field, table)?; )*
        let _ = table;
        Ok(())
      }
    }
  };
}

pub(crate) use resolve_fields;

/// Debug settings for one code, config or data package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugParameters {
  pub service_manifest_name: String,
  pub code_package_name: Option<String>,
  pub config_package_name: Option<String>,
  pub data_package_name: Option<String>,
  pub exe_path: Option<String>,
  pub arguments: Option<String>,
  #[serde(deserialize_with = "lenient_entry_point")]
  pub entry_point_type: EntryPointKind,
  pub code_package_link_folder: Option<String>,
  pub config_package_link_folder: Option<String>,
  pub data_package_link_folder: Option<String>,
  pub working_folder: Option<String>,
  pub container_entry_point: Option<String>,
  pub container_mounted_volumes: Vec<String>,
  pub container_environment_block: Vec<String>,
  pub container_labels: Vec<String>,
}

/// Unknown or missing entry point types fall back to `Main`.
fn lenient_entry_point<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EntryPointKind, D::Error> {
  let raw = Option::<String>::deserialize(deserializer)?;
  Ok(raw.and_then(|s| EntryPointKind::parse(&s)).unwrap_or_default())
}

/// The debug overlay keyed by service manifest and package name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugParameterTable {
  entries: Vec<DebugParameters>,
}

impl DebugParameterTable {
  pub fn parse(raw: &str) -> Result<Self, ParameterError> {
    let entries: Vec<DebugParameters> =
      serde_json::from_str(raw).map_err(|e| ParameterError::MalformedDebug { message: e.to_string() })?;
    Ok(Self { entries })
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn find(&self, service_manifest: &str, kind: SubPackageKind, package: &str) -> Option<&DebugParameters> {
    self.entries.iter().find(|entry| {
      if entry.service_manifest_name != service_manifest {
        return false;
      }
      let name = match kind {
        SubPackageKind::Code => &entry.code_package_name,
        SubPackageKind::Config => &entry.config_package_name,
        SubPackageKind::Data => &entry.data_package_name,
      };
      name.as_deref() == Some(package)
    })
  }
}
