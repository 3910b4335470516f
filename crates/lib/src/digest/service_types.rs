//! Service type digestion and service-group flattening.

use super::DigestError;
use crate::manifest::{LoadMetric, ServiceGroupMember, ServiceTypeDecl};
use crate::package::DigestedServiceType;
use crate::params::{ParameterTable, ResolveParams};

/// Produce the single digested entry for a declared service type.
///
/// A group becomes one synthetic type named after the group. Its load
/// metrics are the group's own explicit metrics when it declares any, and
/// otherwise the union of its members' metrics merged by name.
pub(crate) fn flatten(decl: &ServiceTypeDecl, params: &ParameterTable) -> Result<DigestedServiceType, DigestError> {
  match decl {
    ServiceTypeDecl::Single(service_type) => {
      let mut t = service_type.clone();
      t.resolve_params(params)?;
      Ok(DigestedServiceType {
        service_type_name: t.service_type_name,
        kind: t.kind,
        placement_constraints: t.placement_constraints,
        load_metrics: t.load_metrics,
        group_members: Vec::new(),
      })
    }
    ServiceTypeDecl::Group(group) => {
      let mut g = group.clone();
      g.resolve_params(params)?;
      let load_metrics = if g.load_metrics.is_empty() {
        union_load_metrics(&g.service_group_type_name, &g.members)?
      } else {
        g.load_metrics
      };
      Ok(DigestedServiceType {
        service_type_name: g.service_group_type_name,
        kind: g.kind,
        placement_constraints: g.placement_constraints,
        load_metrics,
        group_members: g.members.into_iter().map(|m| m.service_type_name).collect(),
      })
    }
  }
}

/// Sum default loads of same-named metrics; the weight is the largest one
/// any member specifies.
pub(crate) fn union_load_metrics(group: &str, members: &[ServiceGroupMember]) -> Result<Vec<LoadMetric>, DigestError> {
  let overflow = |metric: &str| {
    DigestError::SchemaValue(format!("default load of metric '{metric}' in group '{group}' overflows"))
  };

  let mut merged: Vec<LoadMetric> = Vec::new();
  for metric in members.iter().flat_map(|m| &m.load_metrics) {
    match merged.iter_mut().find(|existing| existing.name == metric.name) {
      Some(existing) => {
        existing.primary_default_load = existing
          .primary_default_load
          .checked_add(metric.primary_default_load)
          .ok_or_else(|| overflow(&metric.name))?;
        existing.secondary_default_load = existing
          .secondary_default_load
          .checked_add(metric.secondary_default_load)
          .ok_or_else(|| overflow(&metric.name))?;
        existing.weight = existing.weight.max(metric.weight);
      }
      None => merged.push(metric.clone()),
    }
  }
  Ok(merged)
}
