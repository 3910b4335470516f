//! Implementation of the `pkgd checksum` command.
//!
//! Prints the content checksum of a local file or folder, optionally
//! comparing it with the witness recorded next to a store path.

use std::path::Path;

use anyhow::{Context, Result};

use pkgdigest_lib::checksum::{ChecksumWitness, content_checksum, fetch_witness};
use pkgdigest_lib::store::Deadline;

use crate::cmd::{Session, runtime};
use crate::output::{OutputFormat, print_json, print_stat, print_success, print_warning};

pub fn cmd_checksum(session: Option<&Session>, path: &Path, against: Option<&str>, output: OutputFormat) -> Result<()> {
  let checksum = content_checksum(path).with_context(|| format!("Failed to checksum {}", path.display()))?;

  let (Some(session), Some(store_path)) = (session, against) else {
    if output.is_json() {
      return print_json(&serde_json::json!({ "path": path, "checksum": checksum }));
    }
    println!("{checksum}");
    return Ok(());
  };

  let store = session.store();
  let rt = runtime()?;
  let remote = rt
    .block_on(fetch_witness(
      store.as_ref(),
      store_path,
      Deadline::after(session.config.default_timeout),
    ))
    .with_context(|| format!("Failed to read witness for {store_path}"))?;
  let witness = ChecksumWitness::new(checksum, remote);

  if output.is_json() {
    return print_json(&witness);
  }

  print_stat("Local", witness.checksum.as_str());
  if let Some(remote) = &witness.conflicting_checksum {
    print_stat("Store", remote.as_str());
  }
  if witness.is_conflicting() {
    print_warning(&format!("{store_path} was published with different content"));
  } else if witness.conflicting_checksum.is_some() {
    print_success(&format!("{store_path} matches the published content"));
  } else {
    print_success(&format!("{store_path} is not yet published"));
  }

  Ok(())
}
