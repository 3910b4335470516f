//! Implementation of the `pkgd upgrade` command.
//!
//! Loads the running instance, digests the target type version at the next
//! instance version and publishes only the packages whose rollout version
//! moved.

use anyhow::{Context, Result};

use pkgdigest_lib::builder::UpgradeRequest;
use pkgdigest_lib::store::lock::{ApplicationLock, LockMode};
use pkgdigest_lib::upgrade::ChangeKind;

use crate::cmd::{Session, runtime};
use crate::output::{OutputFormat, change_symbol, print_deployment, print_info, print_json, print_success};

pub struct UpgradeArgs {
  pub application_type: String,
  pub application_id: String,
  pub from: u64,
  pub to: String,
  pub params: Vec<(String, String)>,
}

pub fn cmd_upgrade(session: &Session, args: UpgradeArgs, output: OutputFormat) -> Result<()> {
  let _lock = ApplicationLock::acquire(
    &session.store_root,
    &args.application_id,
    LockMode::Exclusive,
    "upgrade",
  )
  .context("Failed to acquire application lock")?;

  let request = UpgradeRequest {
    application_type: args.application_type,
    application_id: args.application_id,
    current_instance: args.from,
    target_version: args.to,
    parameters: args.params.into_iter().collect(),
  };

  let builder = session.builder();
  let rt = runtime()?;
  let deployment = rt
    .block_on(builder.upgrade_application(request, builder.deadline()))
    .context("Upgrade failed")?;

  if output.is_json() {
    return print_json(&deployment);
  }

  print_success(&format!(
    "Upgraded {} to instance {}",
    deployment.instance.application_id, deployment.instance.instance_version
  ));

  if let Some(report) = &deployment.upgrade {
    if report.is_noop() {
      print_info("No package changed; only the instance document was written");
    }
    println!(
      "  {} application package {}",
      change_symbol(report.application),
      report.application_version
    );
    for service in &report.services {
      if service.kind == ChangeKind::Unchanged {
        continue;
      }
      println!(
        "  {} {} {} ({:?})",
        change_symbol(service.kind),
        service.name,
        service.version,
        service.kind
      );
    }
    for removed in &report.removed {
      println!("  {} {}", crate::output::symbols::REMOVE, removed);
    }
  }

  print_deployment(&deployment);
  Ok(())
}
