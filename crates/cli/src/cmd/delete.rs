//! Implementation of the `pkgd delete` command.
//!
//! Removes the application folder: every instance document and every
//! application and service package of the application. Provisioned types
//! are left alone.

use anyhow::{Context, Result};

use pkgdigest_lib::store::lock::{ApplicationLock, LockMode};

use crate::cmd::{Session, runtime};
use crate::output::{print_info, print_success};
use crate::prompts::confirm;

pub fn cmd_delete(session: &Session, application_type: &str, application_id: &str, force: bool) -> Result<()> {
  if !confirm(
    &format!("Delete every document of application '{application_id}'?"),
    force,
  )? {
    print_info("Aborted");
    return Ok(());
  }

  let _lock = ApplicationLock::acquire(&session.store_root, application_id, LockMode::Exclusive, "delete")
    .context("Failed to acquire application lock")?;

  let builder = session.builder();
  let rt = runtime()?;
  rt.block_on(builder.remove_application(application_type, application_id, builder.deadline()))
    .context("Delete failed")?;

  print_success(&format!("Deleted application '{application_id}'"));
  Ok(())
}
