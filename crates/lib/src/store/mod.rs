//! Remote package store.
//!
//! The engine talks to the store only through the [`Store`] trait: existence
//! checks, downloads, uploads and deletes of logical paths, each bounded by a
//! timeout. Logical paths are `/`-separated strings produced by a
//! [`LayoutSpec`]; with the default [`StoreLayout`] they look like:
//!
//! ```text
//! Store/<AppType>/
//! ├── ApplicationManifest.<TypeVersion>.json
//! ├── <ServiceManifest>.Manifest.<Version>.json
//! ├── <ServiceManifest>.<Kind>.<Package>.<Version>/
//! └── apps/<AppId>/
//!     ├── ApplicationInstance.<N>.json
//!     ├── ApplicationPackage.<Major>.<Minor>.json
//!     └── <ServicePackage>.Package.<Major>.<Minor>.json
//! ```
//!
//! Every published path has a sibling `<path>.checksum` witness.

mod layout;
mod local;
pub mod lock;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

pub use layout::{LayoutSpec, StoreLayout};
pub use local::LocalStore;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("deadline exceeded before {operation}")]
  Timeout { operation: String },

  #[error("not found in store: {path}")]
  NotFound { path: String },

  #[error("invalid store path: {path}")]
  InvalidPath { path: String },

  #[error("store I/O failed for {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },
}

impl StoreError {
  pub(crate) fn io(path: &str, source: io::Error) -> Self {
    if source.kind() == io::ErrorKind::NotFound {
      StoreError::NotFound { path: path.to_string() }
    } else {
      StoreError::Io {
        path: path.to_string(),
        source,
      }
    }
  }
}

/// Transfer primitives of a package store.
///
/// Implementations must be usable from spawned tasks, so every returned
/// future is `Send`.
pub trait Store: Send + Sync + 'static {
  fn exists(&self, path: &str, timeout: Duration) -> impl Future<Output = Result<bool, StoreError>> + Send;

  fn download(&self, path: &str, timeout: Duration) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;

  /// Upload a local file or directory to `path`, replacing what is there.
  fn upload(&self, path: &str, source: &Path, timeout: Duration) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn upload_bytes(
    &self,
    path: &str,
    bytes: Vec<u8>,
    timeout: Duration,
  ) -> impl Future<Output = Result<(), StoreError>> + Send;

  /// Delete `path`. Deleting a missing path succeeds.
  fn delete(&self, path: &str, timeout: Duration) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A shared point in time after which no store operation may start.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
  at: Instant,
}

impl Deadline {
  pub fn after(timeout: Duration) -> Self {
    Self {
      at: Instant::now() + timeout,
    }
  }

  /// Time left before the deadline, or [`StoreError::Timeout`] if none.
  pub fn remaining(&self, operation: &str) -> Result<Duration, StoreError> {
    let left = self.at.saturating_duration_since(Instant::now());
    if left.is_zero() {
      Err(StoreError::Timeout {
        operation: operation.to_string(),
      })
    } else {
      Ok(left)
    }
  }
}

/// Where a store rooted on the local filesystem lives.
pub fn resolve_store_root(explicit: Option<PathBuf>) -> Option<PathBuf> {
  explicit.or_else(|| std::env::var_os(crate::consts::STORE_ENV_VAR).map(PathBuf::from))
}
