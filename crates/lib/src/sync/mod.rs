//! Idempotent, conflict-checked publication to the store.
//!
//! A publication is a list of [`SyncItem`]s, each a logical store path plus
//! local content and its checksum. Planning fetches the recorded witness of
//! every path in parallel and decides per item:
//!
//! - no witness, or a different witness: transfer
//! - same witness: skip
//! - different witness under the same version label: conflict, unless the
//!   caller allows skipping checksum validation
//!
//! Publishing uploads every planned item and then its witness, fanned out
//! over a bounded number of tasks. The first failure aborts the remaining
//! tasks. An optional commit item is uploaded only after everything else
//! succeeded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::checksum::{ChecksumError, ChecksumWitness, fetch_witness, record_witness};
use crate::store::{Deadline, Store, StoreError};
use crate::util::hash::{ContentHash, hash_bytes};

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("content at {path} was modified without changing its version (local {local}, store {remote})")]
  VersionReuseConflict {
    path: String,
    local: ContentHash,
    remote: ContentHash,
  },

  #[error("deadline exceeded before {operation}")]
  Timeout { operation: String },

  #[error(transparent)]
  Store(StoreError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error("transfer task failed: {0}")]
  Task(String),
}

impl From<StoreError> for SyncError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::Timeout { operation } => SyncError::Timeout { operation },
      other => SyncError::Store(other),
    }
  }
}

/// True when the destination does not already hold `local`.
pub fn should_transfer(local: &ContentHash, remote: Option<&ContentHash>) -> bool {
  remote != Some(local)
}

/// Decide which checksum to record for `path`.
///
/// With `allow_skip` a conflicting witness is logged and the local content
/// wins, so the next witness at `path` is the local checksum.
pub fn resolve_conflict(path: &str, witness: &ChecksumWitness, allow_skip: bool) -> Result<ContentHash, SyncError> {
  match &witness.conflicting_checksum {
    Some(remote) if remote != &witness.checksum => {
      if !allow_skip {
        return Err(SyncError::VersionReuseConflict {
          path: path.to_string(),
          local: witness.checksum.clone(),
          remote: remote.clone(),
        });
      }
      warn!(
        path,
        local = %witness.checksum,
        remote = %remote,
        "content changed without a version change; checksum validation skipped"
      );
      Ok(witness.checksum.clone())
    }
    _ => Ok(witness.checksum.clone()),
  }
}

#[derive(Debug, Clone)]
pub enum SyncSource {
  /// A file or folder on the local filesystem.
  Path(PathBuf),
  /// An in-memory document.
  Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct SyncItem {
  pub path: String,
  pub source: SyncSource,
  pub checksum: ContentHash,
}

impl SyncItem {
  pub fn from_path(path: impl Into<String>, local: impl Into<PathBuf>, checksum: ContentHash) -> Self {
    Self {
      path: path.into(),
      source: SyncSource::Path(local.into()),
      checksum,
    }
  }

  pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      path: path.into(),
      checksum: hash_bytes(&bytes),
      source: SyncSource::Bytes(bytes),
    }
  }

  /// A JSON document; its checksum covers the exact bytes uploaded.
  pub fn json<T: Serialize>(path: impl Into<String>, document: &T) -> Result<Self, serde_json::Error> {
    Ok(Self::from_bytes(path, serde_json::to_vec_pretty(document)?))
  }
}

#[derive(Debug, Default)]
pub struct SyncPlan {
  pub transfers: Vec<SyncItem>,
  pub unchanged: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncSummary {
  pub uploaded: Vec<String>,
  pub unchanged: Vec<String>,
}

pub struct SyncPlanner<S: Store> {
  store: Arc<S>,
  parallelism: usize,
  allow_skip: bool,
}

impl<S: Store> SyncPlanner<S> {
  pub fn new(store: Arc<S>, parallelism: usize, allow_skip: bool) -> Self {
    Self {
      store,
      parallelism: parallelism.max(1),
      allow_skip,
    }
  }

  /// Fetch the witness of every path in parallel.
  pub async fn witnesses(
    &self,
    paths: Vec<String>,
    deadline: Deadline,
  ) -> Result<BTreeMap<String, Option<ContentHash>>, SyncError> {
    let semaphore = Arc::new(Semaphore::new(self.parallelism));
    let mut join_set = JoinSet::new();

    for path in paths {
      let store = Arc::clone(&self.store);
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.map_err(|e| SyncError::Task(e.to_string()))?;
        let witness = fetch_witness(store.as_ref(), &path, deadline).await?;
        Ok::<_, SyncError>((path, witness))
      });
    }

    let mut found = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(Ok((path, witness))) => {
          found.insert(path, witness);
        }
        Ok(Err(e)) => {
          join_set.abort_all();
          return Err(e);
        }
        Err(e) => {
          join_set.abort_all();
          return Err(SyncError::Task(e.to_string()));
        }
      }
    }
    Ok(found)
  }

  /// Split `items` into transfers and no-ops, failing on any conflict.
  pub async fn plan(&self, items: Vec<SyncItem>, deadline: Deadline) -> Result<SyncPlan, SyncError> {
    let witnesses = self
      .witnesses(items.iter().map(|i| i.path.clone()).collect(), deadline)
      .await?;

    let mut plan = SyncPlan::default();
    for mut item in items {
      let remote = witnesses.get(&item.path).cloned().flatten();
      let witness = ChecksumWitness::new(item.checksum.clone(), remote.clone());
      item.checksum = resolve_conflict(&item.path, &witness, self.allow_skip)?;

      if should_transfer(&item.checksum, remote.as_ref()) {
        debug!(path = %item.path, checksum = %item.checksum, "transfer required");
        plan.transfers.push(item);
      } else {
        debug!(path = %item.path, "unchanged in store");
        plan.unchanged.push(item.path);
      }
    }
    Ok(plan)
  }

  /// Upload every planned transfer together with its witness.
  pub async fn publish(&self, plan: SyncPlan, deadline: Deadline) -> Result<SyncSummary, SyncError> {
    let semaphore = Arc::new(Semaphore::new(self.parallelism));
    let mut join_set = JoinSet::new();

    for item in plan.transfers {
      let store = Arc::clone(&self.store);
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.map_err(|e| SyncError::Task(e.to_string()))?;
        transfer(store.as_ref(), &item, deadline).await?;
        Ok::<_, SyncError>(item.path)
      });
    }

    let mut uploaded = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(Ok(path)) => uploaded.push(path),
        Ok(Err(e)) => {
          join_set.abort_all();
          return Err(e);
        }
        Err(e) => {
          join_set.abort_all();
          return Err(SyncError::Task(e.to_string()));
        }
      }
    }
    uploaded.sort();

    Ok(SyncSummary {
      uploaded,
      unchanged: plan.unchanged,
    })
  }

  /// Plan and publish `items`, then `commit` once everything else landed.
  pub async fn sync(
    &self,
    items: Vec<SyncItem>,
    commit: Option<SyncItem>,
    deadline: Deadline,
  ) -> Result<SyncSummary, SyncError> {
    let mut commit_plan = match commit {
      Some(item) => self.plan(vec![item], deadline).await?,
      None => SyncPlan::default(),
    };
    let plan = self.plan(items, deadline).await?;
    let mut summary = self.publish(plan, deadline).await?;

    if let Some(item) = commit_plan.transfers.pop() {
      transfer(self.store.as_ref(), &item, deadline).await?;
      info!(path = %item.path, "committed");
      summary.uploaded.push(item.path);
    }
    summary.unchanged.append(&mut commit_plan.unchanged);

    info!(
      uploaded = summary.uploaded.len(),
      unchanged = summary.unchanged.len(),
      "store synchronized"
    );
    Ok(summary)
  }
}

/// Upload content, then its witness.
async fn transfer<S: Store>(store: &S, item: &SyncItem, deadline: Deadline) -> Result<(), SyncError> {
  let timeout = deadline.remaining(&format!("upload of {}", item.path))?;
  match &item.source {
    SyncSource::Path(local) => store.upload(&item.path, local, timeout).await?,
    SyncSource::Bytes(bytes) => store.upload_bytes(&item.path, bytes.clone(), timeout).await?,
  }
  record_witness(store, &item.path, &item.checksum, deadline).await?;
  debug!(path = %item.path, "uploaded");
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::sync::Mutex;
  use std::time::Duration;

  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::store::LocalStore;

  fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
  }

  /// Wraps a local store, recording uploads and optionally failing one path.
  struct RecordingStore {
    inner: LocalStore,
    uploads: Mutex<Vec<String>>,
    fail_on: Option<String>,
  }

  impl RecordingStore {
    fn new(root: &Path) -> Self {
      Self {
        inner: LocalStore::new(root),
        uploads: Mutex::new(Vec::new()),
        fail_on: None,
      }
    }

    fn failing(root: &Path, path: &str) -> Self {
      Self {
        fail_on: Some(path.to_string()),
        ..Self::new(root)
      }
    }

    fn uploads(&self) -> Vec<String> {
      self.uploads.lock().unwrap().clone()
    }

    fn record(&self, path: &str) -> Result<(), StoreError> {
      if self.fail_on.as_deref() == Some(path) {
        return Err(StoreError::Io {
          path: path.to_string(),
          source: std::io::Error::other("injected failure"),
        });
      }
      self.uploads.lock().unwrap().push(path.to_string());
      Ok(())
    }
  }

  impl Store for RecordingStore {
    async fn exists(&self, path: &str, timeout: Duration) -> Result<bool, StoreError> {
      self.inner.exists(path, timeout).await
    }

    async fn download(&self, path: &str, timeout: Duration) -> Result<Vec<u8>, StoreError> {
      self.inner.download(path, timeout).await
    }

    async fn upload(&self, path: &str, source: &Path, timeout: Duration) -> Result<(), StoreError> {
      self.record(path)?;
      self.inner.upload(path, source, timeout).await
    }

    async fn upload_bytes(&self, path: &str, bytes: Vec<u8>, timeout: Duration) -> Result<(), StoreError> {
      self.record(path)?;
      self.inner.upload_bytes(path, bytes, timeout).await
    }

    async fn delete(&self, path: &str, timeout: Duration) -> Result<(), StoreError> {
      self.inner.delete(path, timeout).await
    }
  }

  fn planner(store: &Arc<RecordingStore>, allow_skip: bool) -> SyncPlanner<RecordingStore> {
    SyncPlanner::new(Arc::clone(store), 4, allow_skip)
  }

  #[test]
  fn transfer_decision() {
    let a = hash_bytes(b"a");
    let b = hash_bytes(b"b");
    assert!(should_transfer(&a, None));
    assert!(should_transfer(&a, Some(&b)));
    assert!(!should_transfer(&a, Some(&a)));
  }

  #[test]
  fn first_publish_is_not_a_conflict() {
    let witness = ChecksumWitness::new(hash_bytes(b"a"), None);
    assert_eq!(resolve_conflict("p", &witness, false).unwrap(), hash_bytes(b"a"));
  }

  #[tokio::test]
  async fn uploads_content_then_witness_and_skips_unchanged() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new(temp.path()));
    let planner = planner(&store, false);

    let items = || vec![SyncItem::from_bytes("Store/App/a.json", b"a".to_vec())];
    let first = planner.sync(items(), None, deadline()).await.unwrap();
    assert_eq!(first.uploaded, vec!["Store/App/a.json"]);
    assert_eq!(
      store.uploads(),
      vec!["Store/App/a.json", "Store/App/a.json.checksum"]
    );

    let second = planner.sync(items(), None, deadline()).await.unwrap();
    assert!(second.uploaded.is_empty());
    assert_eq!(second.unchanged, vec!["Store/App/a.json"]);
    assert_eq!(store.uploads().len(), 2);
  }

  #[tokio::test]
  async fn changed_content_under_same_version_conflicts() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new(temp.path()));
    let path = "Store/App/Web.Code.Code.1.0";

    planner(&store, false)
      .sync(vec![SyncItem::from_bytes(path, b"c1".to_vec())], None, deadline())
      .await
      .unwrap();

    let err = planner(&store, false)
      .sync(vec![SyncItem::from_bytes(path, b"c2".to_vec())], None, deadline())
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      SyncError::VersionReuseConflict { remote, local, .. }
        if remote == hash_bytes(b"c1") && local == hash_bytes(b"c2")
    ));
  }

  #[tokio::test]
  #[traced_test]
  async fn skip_flag_publishes_local_content() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new(temp.path()));
    let path = "Store/App/Web.Code.Code.1.0";

    planner(&store, false)
      .sync(vec![SyncItem::from_bytes(path, b"c1".to_vec())], None, deadline())
      .await
      .unwrap();
    planner(&store, true)
      .sync(vec![SyncItem::from_bytes(path, b"c2".to_vec())], None, deadline())
      .await
      .unwrap();

    let witness = fetch_witness(store.as_ref(), path, deadline()).await.unwrap();
    assert_eq!(witness, Some(hash_bytes(b"c2")));
    assert_eq!(store.inner.download(path, Duration::from_secs(1)).await.unwrap(), b"c2");
    assert!(logs_contain("checksum validation skipped"));
  }

  #[tokio::test]
  async fn commit_item_goes_last() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new(temp.path()));
    let items = (0..5)
      .map(|i| SyncItem::from_bytes(format!("Store/App/pkg{i}.json"), vec![i]))
      .collect();
    let commit = SyncItem::from_bytes("Store/App/apps/a/ApplicationInstance.1.json", b"instance".to_vec());

    let summary = planner(&store, false).sync(items, Some(commit), deadline()).await.unwrap();
    assert_eq!(summary.uploaded.len(), 6);

    let uploads = store.uploads();
    assert_eq!(
      &uploads[uploads.len() - 2..],
      &[
        "Store/App/apps/a/ApplicationInstance.1.json".to_string(),
        "Store/App/apps/a/ApplicationInstance.1.json.checksum".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn failed_transfer_aborts_before_commit() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::failing(temp.path(), "Store/App/bad.json"));
    let items = vec![
      SyncItem::from_bytes("Store/App/good.json", b"good".to_vec()),
      SyncItem::from_bytes("Store/App/bad.json", b"bad".to_vec()),
    ];
    let commit = SyncItem::from_bytes("Store/App/instance.json", b"instance".to_vec());

    let err = planner(&store, false).sync(items, Some(commit), deadline()).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Io { .. })));
    assert!(!store.uploads().iter().any(|p| p.starts_with("Store/App/instance.json")));
  }

  #[tokio::test]
  async fn expired_deadline_is_timeout() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(RecordingStore::new(temp.path()));
    let err = planner(&store, false)
      .sync(
        vec![SyncItem::from_bytes("Store/App/a.json", b"a".to_vec())],
        None,
        Deadline::after(Duration::ZERO),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Timeout { .. }));
    assert!(store.uploads().is_empty());
  }

  #[tokio::test]
  async fn folders_are_published_from_disk() {
    let temp = TempDir::new().unwrap();
    let local = temp.path().join("Code");
    std::fs::create_dir_all(&local).unwrap();
    std::fs::write(local.join("app.exe"), "exe").unwrap();
    let checksum = crate::checksum::content_checksum(&local).unwrap();

    let store = Arc::new(RecordingStore::new(&temp.path().join("store")));
    let item = SyncItem::from_path("Store/App/Web.Code.Code.1.0", &local, checksum.clone());
    planner(&store, false).sync(vec![item], None, deadline()).await.unwrap();

    let placed = store.inner.resolve("Store/App/Web.Code.Code.1.0").unwrap();
    assert_eq!(crate::checksum::content_checksum(&placed).unwrap(), checksum);
  }
}
