use anyhow::{Context, Result};

use pkgdigest_lib::store::lock::{ApplicationLock, LockMode};

use crate::cmd::{Session, runtime};
use crate::output::{OutputFormat, print_json, print_stat, print_success, symbols, truncate_hash};

pub fn cmd_show(
  session: &Session,
  application_type: &str,
  application_id: &str,
  instance_version: u64,
  output: OutputFormat,
) -> Result<()> {
  let _lock = ApplicationLock::acquire(&session.store_root, application_id, LockMode::Shared, "show")
    .context("Failed to acquire application lock")?;

  let builder = session.builder();
  let rt = runtime()?;
  let (instance, tree) = rt
    .block_on(builder.load_application(application_type, application_id, instance_version, builder.deadline()))
    .with_context(|| format!("Failed to load instance {instance_version} of '{application_id}'"))?;

  if output.is_json() {
    return print_json(&serde_json::json!({ "instance": instance, "packages": tree }));
  }

  print_success(&format!("{} ({})", instance.application_id, instance.name_uri));
  print_stat(
    "Type",
    &format!(
      "{} {}",
      instance.application_type_name, instance.application_type_version
    ),
  );
  print_stat("Instance", &instance.instance_version.to_string());
  print_stat("Application package", &instance.application_package_ref.to_string());

  println!();
  println!("Service packages:");
  for service in &tree.services {
    let version = service.rollout_version.map(|v| v.to_string()).unwrap_or_default();
    let checksum = service
      .content_checksum
      .as_ref()
      .map(|c| truncate_hash(c.as_str()).to_string())
      .unwrap_or_default();
    println!("  {} {} {} {}", symbols::INFO, service.name, version, checksum);
  }

  if !instance.parameters.is_empty() {
    println!();
    println!("Parameters:");
    for (name, value) in &instance.parameters {
      print_stat(name, value);
    }
  }

  Ok(())
}
