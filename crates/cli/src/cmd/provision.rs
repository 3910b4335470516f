//! Implementation of the `pkgd provision` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::cmd::{Session, runtime};
use crate::output::{OutputFormat, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_provision(session: &Session, build_dir: PathBuf, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let builder = session.builder();

  let rt = runtime()?;
  let report = rt
    .block_on(builder.provision_type(build_dir, builder.deadline()))
    .context("Provision failed")?;

  if output.is_json() {
    return print_json(&report);
  }

  print_success(&format!(
    "Provisioned {} {}",
    report.application_type, report.type_version
  ));
  print_stat("Uploaded", &report.summary.uploaded.len().to_string());
  print_stat("Unchanged", &report.summary.unchanged.len().to_string());
  print_stat("Reused from store", &report.reused.len().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));
  for path in &report.reused {
    print_info(&format!("reused {path}"));
  }

  Ok(())
}
