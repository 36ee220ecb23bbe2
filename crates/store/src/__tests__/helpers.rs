//! Test helpers for handle scenarios.
//!
//! `StoreTestContext` owns a temporary data dir and an isolated registry, and
//! `EventLog` records the order in which operations start and finish.

use std::{path::PathBuf, sync::Arc};

use parking_lot::Mutex;
use rowfile_core::StoreConfig;
use tempfile::TempDir;

use crate::{FileHandle, Registry};

/// Isolated storage root plus a registry bound to it
pub struct StoreTestContext {
  /// Temporary directory for table files
  pub data_dir: TempDir,
  pub registry: Registry,
}

impl StoreTestContext {
  pub fn new() -> Self {
    Self::with_config(StoreConfig::default())
  }

  /// Build a context with custom engine settings (data dir is always the temp dir)
  pub fn with_config(config: StoreConfig) -> Self {
    let data_dir = TempDir::new().expect("create data temp dir");
    let registry = Registry::new(StoreConfig {
      data_dir: Some(data_dir.path().to_path_buf()),
      ..config
    });
    Self { data_dir, registry }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.data_dir.path().join(name)
  }

  pub fn handle(&self, name: &str) -> FileHandle {
    self.registry.handle(self.path(name))
  }

  pub fn write_file(&self, name: &str, content: &str) {
    std::fs::write(self.path(name), content).expect("write test file");
  }

  pub fn read_file(&self, name: &str) -> String {
    std::fs::read_to_string(self.path(name)).expect("read test file")
  }
}

/// Thread-safe ordered record of test events
#[derive(Clone, Default)]
pub struct EventLog {
  events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
  pub fn push(&self, event: impl Into<String>) {
    self.events.lock().push(event.into());
  }

  pub fn events(&self) -> Vec<String> {
    self.events.lock().clone()
  }
}
