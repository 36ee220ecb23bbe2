//! Registry - maps normalized file paths to their single FileHandle
//!
//! Every operation on a path must go through the one [`FileHandle`] the registry
//! holds for it; that handle's queue is the only serialization point for the file.
//! The registry is an explicit value rather than a global so stores and tests can
//! each own an isolated one.
//!
//! # Usage
//!
//! ```ignore
//! let registry = Registry::new(config.store.clone());
//! let users = registry.handle(registry.data_dir().join("Users.bson"));
//! users.append_line(r#"{"id":1}"#).await?;
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use dashmap::DashMap;
use path_absolutize::Absolutize;
use rowfile_core::StoreConfig;
use tracing::debug;

use crate::{
  error::Result,
  handle::FileHandle,
  table::RowStore,
};

/// Shared state behind a [`Registry`]
///
/// Handles keep a weak reference back to it so `rename` can resolve the
/// handle of the destination path.
pub(crate) struct RegistryInner {
  /// One handle per normalized path, created lazily
  handles: DashMap<PathBuf, FileHandle>,
  /// Engine settings shared with every handle
  config: Arc<StoreConfig>,
}

/// Process-lifetime mapping from normalized path to [`FileHandle`]
///
/// Cheap to clone; clones share the same handles.
#[derive(Clone)]
pub struct Registry {
  inner: Arc<RegistryInner>,
}

impl Registry {
  /// Create a registry using the given store settings
  pub fn new(config: StoreConfig) -> Self {
    Self {
      inner: Arc::new(RegistryInner {
        handles: DashMap::new(),
        config: Arc::new(config.sanitized()),
      }),
    }
  }

  /// Store settings shared by all handles
  pub fn config(&self) -> &StoreConfig {
    &self.inner.config
  }

  /// Directory holding table files
  pub fn data_dir(&self) -> PathBuf {
    self.inner.config.data_dir()
  }

  /// Get or create the handle for `path`
  ///
  /// Paths are normalized lexically (made absolute, `.` and `..` resolved) so
  /// that every spelling of the same location shares one handle. The file does
  /// not need to exist.
  pub fn handle(&self, path: impl AsRef<Path>) -> FileHandle {
    self.inner.handle(path.as_ref())
  }

  /// Get an existing handle without creating one
  pub fn get(&self, path: impl AsRef<Path>) -> Option<FileHandle> {
    let key = normalize(path.as_ref());
    self.inner.handles.get(&key).map(|h| h.value().clone())
  }

  /// Open a row store for `table` under the data dir
  pub fn table(&self, table: &str) -> Result<RowStore> {
    RowStore::new(self, table)
  }

  /// Number of handles created so far
  pub fn len(&self) -> usize {
    self.inner.handles.len()
  }

  /// Returns true if no handle was created yet
  pub fn is_empty(&self) -> bool {
    self.inner.handles.is_empty()
  }

  /// Snapshot of the registered paths
  pub fn paths(&self) -> Vec<PathBuf> {
    self.inner.handles.iter().map(|entry| entry.key().clone()).collect()
  }

  /// Wait until every registered handle has drained its queue
  ///
  /// Handles created while waiting are not waited on.
  pub async fn idle(&self) {
    let handles: Vec<FileHandle> = self.inner.handles.iter().map(|e| e.value().clone()).collect();
    for handle in handles {
      handle.idle().await;
    }
  }
}

impl Default for Registry {
  fn default() -> Self {
    Self::new(StoreConfig::default())
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("handles", &self.inner.handles.len())
      .field("config", &self.inner.config)
      .finish()
  }
}

impl RegistryInner {
  pub(crate) fn handle(self: &Arc<Self>, path: &Path) -> FileHandle {
    let key = normalize(path);

    // Fast path: handle already exists
    if let Some(handle) = self.handles.get(&key) {
      return handle.value().clone();
    }

    // The entry API keeps creation race-free when two tasks ask for a new path at once
    self
      .handles
      .entry(key.clone())
      .or_insert_with(|| {
        debug!(path = %key.display(), "Creating file handle");
        FileHandle::new(key, Arc::clone(&self.config), Arc::downgrade(self))
      })
      .value()
      .clone()
  }
}

/// Lexically normalize a path into the registry key
///
/// Falls back to the path as given when the working directory is unavailable.
pub(crate) fn normalize(path: &Path) -> PathBuf {
  path
    .absolutize()
    .map(|p| p.into_owned())
    .unwrap_or_else(|_| path.to_path_buf())
}
