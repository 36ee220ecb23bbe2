//! Error types for file handles and row stores

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
  /// Malformed call, rejected before anything is queued
  #[error("Bad arguments: {0}")]
  Argument(String),

  #[error("IO error during {op} on {path}: {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Malformed JSON at {path}:{line}: {source}")]
  Parse {
    path: PathBuf,
    line: usize,
    #[source]
    source: serde_json::Error,
  },

  #[error("Invalid row at {path}:{line}: {reason}")]
  InvalidRow {
    path: PathBuf,
    line: usize,
    reason: String,
  },

  #[error("Temp file already exists: {0}")]
  TempExists(PathBuf),

  #[error("Row not found: {0}")]
  RowNotFound(i64),

  #[error("File registry has been dropped")]
  RegistryClosed,

  #[error("Rewrite failed: {0}")]
  Rewrite(String),
}

impl StoreError {
  /// Build a closure mapping an io::Error to [`StoreError::Io`] for `path`
  pub(crate) fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
      op,
      path: path.to_path_buf(),
      source,
    }
  }

  /// True when the underlying failure is a missing file
  pub fn is_not_found(&self) -> bool {
    matches!(self, StoreError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
  }
}

pub type Result<T> = std::result::Result<T, StoreError>;
