//! Content checksums and their store witnesses.
//!
//! Every path published to the store has a sibling witness file holding the
//! lowercase hex checksum of what was published. The witness is what later
//! runs compare against to skip redundant transfers and to catch content
//! that changed under an unchanged version label.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::CHECKSUM_FILE_SUFFIX;
use crate::store::{Deadline, Store, StoreError};
use crate::util::hash::{ContentHash, DirHashError, hash_directory, hash_file};

#[derive(Debug, Error)]
pub enum ChecksumError {
  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("nothing to checksum at {0}")]
  Missing(PathBuf),

  #[error("checksum task failed: {0}")]
  Task(String),
}

/// The local checksum of an artifact and, when the destination already
/// exists in the store, the checksum recorded there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumWitness {
  pub checksum: ContentHash,
  pub conflicting_checksum: Option<ContentHash>,
}

impl ChecksumWitness {
  pub fn new(checksum: ContentHash, remote: Option<ContentHash>) -> Self {
    Self {
      checksum,
      conflicting_checksum: remote,
    }
  }

  /// True when the store holds different content under the same path.
  pub fn is_conflicting(&self) -> bool {
    self
      .conflicting_checksum
      .as_ref()
      .is_some_and(|remote| remote != &self.checksum)
  }
}

/// Logical path of the witness for `path`.
pub fn witness_path(path: &str) -> String {
  format!("{path}{CHECKSUM_FILE_SUFFIX}")
}

/// Checksum a file or a folder tree.
pub fn content_checksum(path: &Path) -> Result<ContentHash, ChecksumError> {
  if path.is_dir() {
    Ok(hash_directory(path, &[])?)
  } else if path.is_file() {
    Ok(hash_file(path)?)
  } else {
    Err(ChecksumError::Missing(path.to_path_buf()))
  }
}

/// [`content_checksum`] off the async runtime.
pub async fn content_checksum_async(path: PathBuf) -> Result<ContentHash, ChecksumError> {
  tokio::task::spawn_blocking(move || content_checksum(&path))
    .await
    .map_err(|e| ChecksumError::Task(e.to_string()))?
}

/// Read the witness recorded for `path`, if any.
pub async fn fetch_witness<S: Store>(
  store: &S,
  path: &str,
  deadline: Deadline,
) -> Result<Option<ContentHash>, StoreError> {
  let witness = witness_path(path);
  let timeout = deadline.remaining(&format!("checksum lookup of {path}"))?;
  if !store.exists(&witness, timeout).await? {
    return Ok(None);
  }

  let timeout = deadline.remaining(&format!("checksum download of {path}"))?;
  let bytes = match store.download(&witness, timeout).await {
    Ok(bytes) => bytes,
    Err(StoreError::NotFound { .. }) => return Ok(None),
    Err(e) => return Err(e),
  };
  let recorded = ContentHash::from_witness(&String::from_utf8_lossy(&bytes));
  debug!(path, checksum = recorded.as_ref().map(|c| c.as_str()).unwrap_or("<empty>"), "fetched witness");
  Ok(recorded)
}

/// Record `checksum` as the witness for `path`.
pub async fn record_witness<S: Store>(
  store: &S,
  path: &str,
  checksum: &ContentHash,
  deadline: Deadline,
) -> Result<(), StoreError> {
  let timeout = deadline.remaining(&format!("checksum upload of {path}"))?;
  store
    .upload_bytes(&witness_path(path), checksum.as_str().as_bytes().to_vec(), timeout)
    .await
}
