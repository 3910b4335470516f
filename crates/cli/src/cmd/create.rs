//! Implementation of the `pkgd create` command.

use anyhow::{Context, Result};

use pkgdigest_lib::builder::CreateRequest;
use pkgdigest_lib::store::lock::{ApplicationLock, LockMode};

use crate::cmd::{Session, runtime};
use crate::output::{OutputFormat, print_deployment, print_json, print_success};

pub struct CreateArgs {
  pub application_type: String,
  pub type_version: String,
  pub application_id: String,
  pub name_uri: Option<String>,
  pub params: Vec<(String, String)>,
}

pub fn cmd_create(session: &Session, args: CreateArgs, output: OutputFormat) -> Result<()> {
  let _lock = ApplicationLock::acquire(
    &session.store_root,
    &args.application_id,
    LockMode::Exclusive,
    "create",
  )
  .context("Failed to acquire application lock")?;

  let name_uri = args
    .name_uri
    .unwrap_or_else(|| format!("app:/{}", args.application_id));
  let request = CreateRequest {
    application_type: args.application_type,
    type_version: args.type_version,
    application_id: args.application_id,
    name_uri,
    parameters: args.params.into_iter().collect(),
  };

  let builder = session.builder();
  let rt = runtime()?;
  let deployment = rt
    .block_on(builder.create_application(request, builder.deadline()))
    .context("Create failed")?;

  if output.is_json() {
    return print_json(&deployment);
  }

  print_success(&format!(
    "Created {} (instance {})",
    deployment.instance.application_id, deployment.instance.instance_version
  ));
  print_deployment(&deployment);
  Ok(())
}
