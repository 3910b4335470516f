//! A [`Store`] backed by a directory on the local filesystem.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;
use walkdir::WalkDir;

use super::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct LocalStore {
  root: PathBuf,
}

impl LocalStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Map a logical path onto the filesystem, refusing anything that could
  /// escape the root.
  pub fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
    let mut full = self.root.clone();
    for segment in path.split('/') {
      if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['\\', ':']) {
        return Err(StoreError::InvalidPath { path: path.to_string() });
      }
      full.push(segment);
    }
    Ok(full)
  }
}

async fn bounded<T>(
  path: &str,
  timeout: Duration,
  op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
  tokio::time::timeout(timeout, op)
    .await
    .map_err(|_| StoreError::Timeout {
      operation: format!("transfer of {path}"),
    })?
}

async fn blocking<T: Send + 'static>(
  path: &str,
  f: impl FnOnce() -> io::Result<T> + Send + 'static,
) -> Result<T, StoreError> {
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| StoreError::io(path, io::Error::other(e)))?
    .map_err(|e| StoreError::io(path, e))
}

fn parent_of(dest: &Path) -> io::Result<&Path> {
  dest
    .parent()
    .ok_or_else(|| io::Error::other(format!("{} has no parent directory", dest.display())))
}

fn remove_existing(dest: &Path) -> io::Result<()> {
  match fs::symlink_metadata(dest) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest),
    Ok(_) => fs::remove_file(dest),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
  for entry in WalkDir::new(source).follow_links(true) {
    let entry = entry.map_err(io::Error::from)?;
    let rel = entry.path().strip_prefix(source).map_err(io::Error::other)?;
    let target = dest.join(rel);
    if entry.file_type().is_dir() {
      fs::create_dir_all(&target)?;
    } else {
      fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

/// Stage next to `dest`, then swap into place.
fn place_file(dest: &Path, write: impl FnOnce(&mut fs::File) -> io::Result<()>) -> io::Result<()> {
  let parent = parent_of(dest)?;
  fs::create_dir_all(parent)?;
  let mut staged = tempfile::NamedTempFile::new_in(parent)?;
  write(staged.as_file_mut())?;
  staged.as_file().sync_all()?;
  if dest.is_dir() {
    fs::remove_dir_all(dest)?;
  }
  staged.persist(dest).map_err(|e| e.error)?;
  Ok(())
}

fn place_tree(source: &Path, dest: &Path) -> io::Result<()> {
  let parent = parent_of(dest)?;
  fs::create_dir_all(parent)?;
  let staging = tempfile::Builder::new().prefix(".staging").tempdir_in(parent)?;
  copy_tree(source, staging.path())?;
  remove_existing(dest)?;
  fs::rename(staging.path(), dest)
}

impl Store for LocalStore {
  async fn exists(&self, path: &str, timeout: Duration) -> Result<bool, StoreError> {
    let full = self.resolve(path)?;
    bounded(path, timeout, async {
      tokio::fs::try_exists(&full).await.map_err(|e| StoreError::io(path, e))
    })
    .await
  }

  async fn download(&self, path: &str, timeout: Duration) -> Result<Vec<u8>, StoreError> {
    let full = self.resolve(path)?;
    bounded(path, timeout, async {
      tokio::fs::read(&full).await.map_err(|e| StoreError::io(path, e))
    })
    .await
  }

  async fn upload(&self, path: &str, source: &Path, timeout: Duration) -> Result<(), StoreError> {
    let dest = self.resolve(path)?;
    let source = source.to_path_buf();
    trace!(path, source = %source.display(), "uploading");
    bounded(path, timeout, async {
      blocking(path, move || {
        if source.is_dir() {
          place_tree(&source, &dest)
        } else {
          let mut input = fs::File::open(&source)?;
          place_file(&dest, |out| io::copy(&mut input, out).map(|_| ()))
        }
      })
      .await
    })
    .await
  }

  async fn upload_bytes(&self, path: &str, bytes: Vec<u8>, timeout: Duration) -> Result<(), StoreError> {
    let dest = self.resolve(path)?;
    trace!(path, len = bytes.len(), "uploading bytes");
    bounded(path, timeout, async {
      blocking(path, move || place_file(&dest, |out| io::Write::write_all(out, &bytes))).await
    })
    .await
  }

  async fn delete(&self, path: &str, timeout: Duration) -> Result<(), StoreError> {
    let full = self.resolve(path)?;
    bounded(path, timeout, async { blocking(path, move || remove_existing(&full)).await }).await
  }
}
