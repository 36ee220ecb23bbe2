//! Atomic line rewrite
//!
//! A rewrite holds the original path's slot for its whole duration, so other
//! operations on the path never see the intermediate state.
//!
//! ```text
//!            rename                     replay task (temp slot)
//! path ──────────────► path_temp ──► ChunkReader ──► mpsc (bounded) ──┐
//!                                                                     │
//! path (new file) ◄── LineSink ◄── visitor(line) -> LineEdit ◄────────┘
//! ```
//!
//! The temp file is deleted once the new file is complete. If the rewrite's
//! future is dropped before that, the temp file is renamed back over the
//! partial output so the next queued operation sees the original file.

use std::{
  ffi::OsString,
  path::{Path, PathBuf},
};

use tokio::{
  fs::File,
  io::{AsyncWriteExt, BufWriter},
  sync::mpsc,
  task::AbortHandle,
};
use tracing::{debug, warn};

use crate::{
  error::{Result, StoreError},
  handle::{Exclusive, FileHandle},
};

/// Answer of a [`crate::FileHandle::replace_each_line`] visitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit {
  /// Write the old line as it was read
  ///
  /// Lines are trimmed when read, so surrounding whitespace and `\r\n`
  /// endings come out as plain `\n`-separated text.
  Keep,
  /// Write this text instead of the old line
  Replace(String),
  /// Drop the old line
  Delete,
  /// Drop this line and every remaining one
  End,
}

/// Buffered line writer counting the bytes it wrote
pub(crate) struct LineSink {
  writer: BufWriter<File>,
  path: PathBuf,
  written: u64,
}

impl LineSink {
  /// Create or truncate `path`
  pub(crate) async fn create(path: &Path) -> Result<Self> {
    let file = File::create(path).await.map_err(StoreError::io("create", path))?;
    Ok(Self {
      writer: BufWriter::new(file),
      path: path.to_path_buf(),
      written: 0,
    })
  }

  pub(crate) async fn write_str(&mut self, text: &str) -> Result<()> {
    self
      .writer
      .write_all(text.as_bytes())
      .await
      .map_err(StoreError::io("write", &self.path))?;
    self.written += text.len() as u64;
    Ok(())
  }

  /// Write `line` followed by a newline
  pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
    self.write_str(line).await?;
    self.write_str("\n").await
  }

  /// Flush and close, returning the total bytes written
  pub(crate) async fn finish(mut self) -> Result<u64> {
    self.writer.flush().await.map_err(StoreError::io("flush", &self.path))?;
    self
      .writer
      .into_inner()
      .sync_all()
      .await
      .map_err(StoreError::io("sync", &self.path))?;
    Ok(self.written)
  }
}

/// What the replay task saw of the temp file
#[derive(Debug)]
struct Replay {
  lines: usize,
  ended_with_newline: bool,
}

/// Cleanup owed when a rewrite stops before it finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
  /// The original still lives in the temp file: move it back
  Restore,
  /// The new file is complete: the temp file only needs deleting
  Remove,
  Nothing,
}

/// Puts the file system back in order if the rewrite future is dropped
///
/// Must be declared before the [`LineSink`] so the sink closes first.
struct TempGuard {
  path: PathBuf,
  temp_path: PathBuf,
  pending: Pending,
  reader: Option<AbortHandle>,
}

impl TempGuard {
  fn new(path: &Path, temp_path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      temp_path: temp_path.to_path_buf(),
      pending: Pending::Restore,
      reader: None,
    }
  }

  /// Leave the temp file where it is
  fn keep_temp(&mut self) {
    self.pending = Pending::Nothing;
  }
}

impl Drop for TempGuard {
  fn drop(&mut self) {
    if self.pending == Pending::Nothing {
      return;
    }
    if let Some(reader) = self.reader.take() {
      reader.abort();
    }

    // Drop cannot await; these are single metadata operations
    match self.pending {
      Pending::Restore => {
        if let Err(e) = std::fs::rename(&self.temp_path, &self.path) {
          warn!(path = %self.path.display(), error = %e, "Failed to restore file after cancelled rewrite");
        } else {
          debug!(path = %self.path.display(), "Restored file after cancelled rewrite");
        }
      }
      Pending::Remove => {
        if let Err(e) = std::fs::remove_file(&self.temp_path)
          && e.kind() != std::io::ErrorKind::NotFound
        {
          warn!(temp = %self.temp_path.display(), error = %e, "Failed to delete temp file");
        }
      }
      Pending::Nothing => {}
    }
  }
}

async fn write_record(sink: &mut LineSink, separator: &str, text: &str) -> Result<()> {
  sink.write_str(separator).await?;
  sink.write_str(text).await
}

/// `<path><suffix>`
pub fn temp_path(path: &Path, suffix: &str) -> PathBuf {
  let mut name = OsString::from(path.as_os_str());
  name.push(suffix);
  PathBuf::from(name)
}

/// Rewrite pass whose visitor also gets each line's 1-based physical line number
pub(crate) async fn replace_each_line<F>(exclusive: &Exclusive, mut each: F) -> Result<u64>
where
  F: FnMut(usize, &str) -> Result<LineEdit>,
{
  let path = exclusive.path().to_path_buf();
  let temp_path = temp_path(&path, &exclusive.config().temp_suffix);

  if tokio::fs::try_exists(&temp_path)
    .await
    .map_err(StoreError::io("stat", &temp_path))?
  {
    warn!(path = %path.display(), temp = %temp_path.display(), "Leftover temp file blocks rewrite");
    return Err(StoreError::TempExists(temp_path));
  }

  let temp = exclusive.rename(&temp_path).await?;
  let mut guard = TempGuard::new(&path, &temp_path);

  // Dropping the guard here moves the original back
  let mut sink = LineSink::create(&path).await?;

  let (tx, mut rx) = mpsc::channel::<(usize, String)>(exclusive.config().rewrite_buffer);
  let reader = tokio::spawn(replay(temp.clone(), tx));
  guard.reader = Some(reader.abort_handle());

  let mut lines_written = 0usize;
  let mut cut = false;
  let mut write_error: Option<StoreError> = None;
  let mut visitor_error: Option<StoreError> = None;

  while let Some((line_number, line)) = rx.recv().await {
    // Blank lines are layout, not records; ahead of the first record they are dropped
    if line.is_empty() && lines_written == 0 {
      continue;
    }

    let edit = if line.is_empty() || visitor_error.is_some() {
      LineEdit::Keep
    } else {
      match each(line_number, &line) {
        Ok(edit) => edit,
        Err(e) => {
          warn!(path = %path.display(), line = line_number, error = %e, "Rewrite visitor failed, copying remaining lines unchanged");
          visitor_error = Some(e);
          LineEdit::Keep
        }
      }
    };

    let text = match edit {
      LineEdit::Keep => line,
      LineEdit::Replace(text) => text,
      LineEdit::Delete => continue,
      LineEdit::End => {
        cut = true;
        break;
      }
    };

    let separator = if lines_written > 0 { "\n" } else { "" };
    if let Err(e) = write_record(&mut sink, separator, &text).await {
      write_error = Some(e);
      break;
    }
    lines_written += 1;
  }

  // Closing the channel stops the replay task if we left early
  drop(rx);
  let replay = reader.await.map_err(|e| StoreError::Rewrite(e.to_string()))?;

  if let Some(e) = write_error {
    warn!(path = %path.display(), temp = %temp_path.display(), "Rewrite aborted, temp file kept");
    guard.keep_temp();
    return Err(e);
  }

  let replay = match replay {
    Ok(replay) => replay,
    Err(e) => {
      warn!(path = %path.display(), temp = %temp_path.display(), error = %e, "Rewrite source unreadable, temp file kept");
      guard.keep_temp();
      sink.finish().await?;
      return Err(e);
    }
  };

  if lines_written > 0 && (replay.ended_with_newline || cut) {
    sink.write_str("\n").await?;
  }
  let written = sink.finish().await?;

  guard.pending = Pending::Remove;
  temp.unlink().await?;
  guard.pending = Pending::Nothing;

  debug!(
    path = %path.display(),
    read = replay.lines,
    lines = lines_written,
    written,
    "Rewrote file"
  );

  match visitor_error {
    Some(e) => Err(e),
    None => Ok(written),
  }
}

/// Stream the temp file's numbered lines into `tx`
///
/// Runs under the temp path's own slot and stops quietly when the receiver
/// goes away. The temp file is left for the rewrite to delete.
async fn replay(temp: FileHandle, tx: mpsc::Sender<(usize, String)>) -> Result<Replay> {
  let exclusive = temp.lock().await;
  let mut reader = exclusive.lines().await?;
  let mut lines = 0;

  while let Some(line) = reader.next_line().await? {
    if tx.send((reader.line_number(), line)).await.is_err() {
      break;
    }
    lines += 1;
  }

  Ok(Replay {
    lines,
    ended_with_newline: reader.ended_with_newline(),
  })
}
