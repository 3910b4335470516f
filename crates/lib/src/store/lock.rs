//! Per-application lock files for mutual exclusion between builder runs.
//!
//! Two create/upgrade/delete operations for the same application id must
//! not touch the store at once. Readers take a shared lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const LOCK_DIR: &str = ".locks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub application_id: String,
}

#[derive(Debug, Error)]
pub enum ApplicationLockError {
  #[error(
    "application '{application_id}' is locked by another process: {command} (PID {pid}, started at Unix timestamp {started_at_unix})\n\
     If no other pkgd process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    application_id: String,
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "application '{application_id}' is locked (could not read lock metadata)\n\
     If no other pkgd process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { application_id: String, lock_path: PathBuf },

  #[error("invalid application id for locking: '{0}'")]
  InvalidId(String),

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Held for as long as the value lives; released on drop.
pub struct ApplicationLock {
  file: File,
  lock_path: PathBuf,
}

impl ApplicationLock {
  pub fn acquire(
    store_root: &Path,
    application_id: &str,
    mode: LockMode,
    command: &str,
  ) -> Result<Self, ApplicationLockError> {
    if application_id.is_empty() || application_id.contains(['/', '\\']) || application_id.starts_with('.') {
      return Err(ApplicationLockError::InvalidId(application_id.to_string()));
    }

    let dir = store_root.join(LOCK_DIR);
    std::fs::create_dir_all(&dir).map_err(ApplicationLockError::CreateDir)?;
    let lock_path = dir.join(format!("{application_id}.lock"));

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(ApplicationLockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(contention_error(application_id, &lock_path));
      }
      return Err(ApplicationLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, command, application_id)?;
    }

    Ok(Self { file, lock_path })
  }

  /// Read the metadata through the held handle; reopening the file would
  /// fail on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, command: &str, application_id: &str) -> Result<(), ApplicationLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    application_id: application_id.to_string(),
  };

  file.set_len(0).map_err(ApplicationLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata)
    .map_err(|e| ApplicationLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(ApplicationLockError::WriteMetadata)
}

fn contention_error(application_id: &str, lock_path: &Path) -> ApplicationLockError {
  if let Ok(contents) = std::fs::read_to_string(lock_path)
    && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
  {
    return ApplicationLockError::Contention {
      application_id: application_id.to_string(),
      command: metadata.command,
      pid: metadata.pid,
      started_at_unix: metadata.started_at_unix,
      lock_path: lock_path.to_path_buf(),
    };
  }

  ApplicationLockError::ContentionUnknown {
    application_id: application_id.to_string(),
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is
  // owned by `file` for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
