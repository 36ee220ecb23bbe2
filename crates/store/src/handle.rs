//! FileHandle - the per-path serialization point
//!
//! A handle owns a FIFO queue of pending operations and an "active" marker.
//! Every public operation enqueues itself synchronously when it is called and
//! runs once it reaches the front of the queue, so operations on one path
//! execute strictly in call order and never overlap. There is no OS lock: the
//! queue is the mutex.
//!
//! # Operations
//!
//! ```text
//! call ──► enqueue ──► (wait for slot) ──► Exclusive ──► I/O ──► drop = release
//!                                                                   │
//!                                       next waiter ◄───────────────┤
//!                                       or idle     ◄───────────────┘
//! ```
//!
//! The active operation is represented by an [`Exclusive`] guard. Dropping it
//! is the completion signal: the active marker is cleared and the slot is
//! handed to the next waiter, or the handle reports idle when none remain.
//! Compound operations that must not interleave with others (scan then append)
//! take the guard once with [`FileHandle::lock`] and call its primitives.
//!
//! I/O failures are returned to the operation that hit them. They never stall
//! or abort the queue.

use std::{
  collections::VecDeque,
  future::Future,
  io::SeekFrom,
  path::{Path, PathBuf},
  pin::Pin,
  sync::{Arc, Weak},
  task::{Context, Poll, ready},
};

use parking_lot::Mutex;
use rowfile_core::StoreConfig;
use tokio::{
  fs::OpenOptions,
  io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
  sync::{oneshot, watch},
};
use tracing::{debug, trace};

use crate::{
  error::{Result, StoreError},
  reader::ChunkReader,
  registry::RegistryInner,
  rewrite::{self, LineEdit, LineSink},
};

// ============================================================================
// Generator protocol
// ============================================================================

/// Answer of a [`FileHandle::write_each_line`] generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
  /// Write this line (a newline is appended)
  Line(String),
  /// Write nothing this round and ask again
  Skip,
  /// No more lines, close the file
  End,
}

// ============================================================================
// Operation queue
// ============================================================================

/// Queue state guarded by the handle's mutex
///
/// Invariant: when `active` is false, `waiting` is empty.
#[derive(Default)]
struct OperationQueue {
  /// An operation currently owns the file
  active: bool,
  /// Operations waiting for the slot, in submission order
  waiting: VecDeque<oneshot::Sender<()>>,
  /// Total operations submitted (for logs)
  submitted: u64,
}

struct HandleInner {
  path: PathBuf,
  config: Arc<StoreConfig>,
  registry: Weak<RegistryInner>,
  queue: Mutex<OperationQueue>,
  /// Drained event: true while nothing is active or queued
  idle: watch::Sender<bool>,
}

/// Handle to one file, shared by everything that touches that path
///
/// Obtain handles from a [`crate::Registry`] so that a path never has two.
/// The handle is cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct FileHandle {
  inner: Arc<HandleInner>,
}

impl std::fmt::Debug for FileHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FileHandle")
      .field("path", &self.inner.path)
      .field("pending", &self.pending())
      .finish()
  }
}

impl FileHandle {
  pub(crate) fn new(path: PathBuf, config: Arc<StoreConfig>, registry: Weak<RegistryInner>) -> Self {
    let (idle, _) = watch::channel(true);
    Self {
      inner: Arc::new(HandleInner {
        path,
        config,
        registry,
        queue: Mutex::new(OperationQueue::default()),
        idle,
      }),
    }
  }

  /// Normalized path of the file
  pub fn path(&self) -> &Path {
    &self.inner.path
  }

  /// True if both values are the same handle instance
  pub fn same_as(&self, other: &FileHandle) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Number of operations active or waiting
  pub fn pending(&self) -> usize {
    let queue = self.inner.queue.lock();
    usize::from(queue.active) + queue.waiting.len()
  }

  /// Resolves once no operation is active or queued
  pub async fn idle(&self) {
    let mut rx = self.inner.idle.subscribe();
    // The sender lives as long as `self`, so this only fails if it is dropped mid-wait
    let _ = rx.wait_for(|idle| *idle).await;
  }

  /// Enqueue an operation slot
  ///
  /// The slot is reserved immediately, before the returned future is polled,
  /// so call order is queue order. Await the [`Lock`] to get the [`Exclusive`]
  /// guard; dropping either one releases or forfeits the slot.
  pub fn lock(&self) -> Lock {
    let mut queue = self.inner.queue.lock();
    queue.submitted += 1;
    let seq = queue.submitted;

    let state = if queue.active {
      let (tx, rx) = oneshot::channel();
      queue.waiting.push_back(tx);
      trace!(path = %self.inner.path.display(), seq, waiting = queue.waiting.len(), "Operation queued");
      LockState::Waiting(rx)
    } else {
      queue.active = true;
      self.inner.idle.send_replace(false);
      trace!(path = %self.inner.path.display(), seq, "Operation dispatched immediately");
      LockState::Granted
    };

    Lock {
      handle: self.clone(),
      state,
    }
  }

  /// Completion signal: hand the slot to the next live waiter or go idle
  fn release(&self) {
    let mut queue = self.inner.queue.lock();
    while let Some(next) = queue.waiting.pop_front() {
      // A failed send means that waiter was dropped; skip it
      if next.send(()).is_ok() {
        trace!(path = %self.inner.path.display(), waiting = queue.waiting.len(), "Slot handed to next operation");
        return;
      }
    }
    queue.active = false;
    self.inner.idle.send_replace(true);
    trace!(path = %self.inner.path.display(), "Queue drained");
  }

  // ==========================================================================
  // Queued operations
  // ==========================================================================

  /// Check whether the file exists
  pub fn exists(&self) -> impl Future<Output = bool> + use<> {
    let lock = self.lock();
    async move { lock.await.exists().await }
  }

  /// Read the entire file as UTF-8
  pub fn read(&self) -> impl Future<Output = Result<String>> + use<> {
    let lock = self.lock();
    async move { lock.await.read().await }
  }

  /// Call `each` for every line, in order
  ///
  /// The next line is only read after `each` returns; an error from `each`
  /// stops the scan and is returned.
  pub fn read_each_line<F>(&self, each: F) -> impl Future<Output = Result<()>> + use<F>
  where
    F: FnMut(String) -> Result<()>,
  {
    let lock = self.lock();
    async move { lock.await.read_each_line(each).await }
  }

  /// Create or replace the file with `text`
  pub fn write(&self, text: &str) -> impl Future<Output = Result<()>> + use<> {
    let text = text.to_string();
    let lock = self.lock();
    async move { lock.await.write(&text).await }
  }

  /// Create or replace the file with lines produced by `next`
  ///
  /// Returns the number of bytes written.
  pub fn write_each_line<F>(&self, next: F) -> impl Future<Output = Result<u64>> + use<F>
  where
    F: FnMut() -> Push,
  {
    let lock = self.lock();
    async move { lock.await.write_each_line(next).await }
  }

  /// Atomically rewrite the file line by line
  ///
  /// See [`Exclusive::replace_each_line`]. Returns the number of bytes written.
  pub fn replace_each_line<F>(&self, each: F) -> impl Future<Output = Result<u64>> + use<F>
  where
    F: FnMut(&str) -> Result<LineEdit>,
  {
    let lock = self.lock();
    async move { lock.await.replace_each_line(each).await }
  }

  /// Append raw text at the end of the file, creating it if needed
  pub fn append(&self, text: &str) -> impl Future<Output = Result<()>> + use<> {
    let text = text.to_string();
    let lock = self.lock();
    async move { lock.await.append(&text).await }
  }

  /// Append `text` as a new final line
  ///
  /// See [`Exclusive::append_line`].
  pub fn append_line(&self, text: &str) -> impl Future<Output = Result<()>> + use<> {
    let text = text.to_string();
    let lock = self.lock();
    async move { lock.await.append_line(&text).await }
  }

  /// Move the file, returning the handle of the destination
  pub fn rename(&self, new_path: &Path) -> impl Future<Output = Result<FileHandle>> + use<> {
    let new_path = new_path.to_path_buf();
    let lock = self.lock();
    async move { lock.await.rename(&new_path).await }
  }

  /// Delete the file
  pub fn unlink(&self) -> impl Future<Output = Result<()>> + use<> {
    let lock = self.lock();
    async move { lock.await.unlink().await }
  }
}

// ============================================================================
// Lock future
// ============================================================================

enum LockState {
  /// The slot was free at submission time
  Granted,
  /// Queued behind other operations
  Waiting(oneshot::Receiver<()>),
  /// Converted into an [`Exclusive`]
  Taken,
}

/// A reserved place in a handle's queue
///
/// Resolves to the [`Exclusive`] guard once every earlier operation on the
/// path has completed.
#[must_use = "an unawaited lock holds its place in the queue until dropped"]
pub struct Lock {
  handle: FileHandle,
  state: LockState,
}

impl Future for Lock {
  type Output = Exclusive;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Exclusive> {
    let this = self.get_mut();

    if let LockState::Waiting(rx) = &mut this.state {
      // Senders are only dropped unsent together with the handle, which we hold
      let _ = ready!(Pin::new(rx).poll(cx));
    }

    match std::mem::replace(&mut this.state, LockState::Taken) {
      LockState::Taken => panic!("Lock polled after completion"),
      LockState::Granted | LockState::Waiting(_) => Poll::Ready(Exclusive {
        handle: this.handle.clone(),
      }),
    }
  }
}

impl Drop for Lock {
  fn drop(&mut self) {
    match std::mem::replace(&mut self.state, LockState::Taken) {
      LockState::Granted => self.handle.release(),
      LockState::Waiting(mut rx) => {
        // If the slot reached us before we closed, pass it on
        rx.close();
        if rx.try_recv().is_ok() {
          self.handle.release();
        }
      }
      LockState::Taken => {}
    }
  }
}

// ============================================================================
// Exclusive guard
// ============================================================================

/// The active operation on a file
///
/// While this guard lives, no other queued operation on the path runs.
/// Dropping it releases the slot.
pub struct Exclusive {
  handle: FileHandle,
}

impl Drop for Exclusive {
  fn drop(&mut self) {
    self.handle.release();
  }
}

impl Exclusive {
  /// Path of the locked file
  pub fn path(&self) -> &Path {
    self.handle.path()
  }

  /// The handle this guard belongs to
  pub fn handle(&self) -> &FileHandle {
    &self.handle
  }

  pub(crate) fn config(&self) -> &StoreConfig {
    &self.handle.inner.config
  }

  /// Check whether the file exists (errors count as absent)
  pub async fn exists(&self) -> bool {
    tokio::fs::try_exists(self.path()).await.unwrap_or(false)
  }

  /// Like [`Self::exists`], but only a missing file counts as absent
  pub(crate) async fn try_exists(&self) -> Result<bool> {
    match tokio::fs::metadata(self.path()).await {
      Ok(_) => Ok(true),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(StoreError::io("stat", self.path())(e)),
    }
  }

  /// Read the entire file as UTF-8
  pub async fn read(&self) -> Result<String> {
    tokio::fs::read_to_string(self.path())
      .await
      .map_err(StoreError::io("read", self.path()))
  }

  /// Open a line reader over the file
  ///
  /// Pulling the next line is the continuation of the previous one. The
  /// reader is independent of the guard, but callers should finish with it
  /// before dropping the guard so other operations see a quiet file.
  pub async fn lines(&self) -> Result<ChunkReader> {
    ChunkReader::open(self.path(), self.config().chunk_size).await
  }

  /// Call `each` for every line, in order
  pub async fn read_each_line<F>(&self, mut each: F) -> Result<()>
  where
    F: FnMut(String) -> Result<()>,
  {
    let mut lines = self.lines().await?;
    while let Some(line) = lines.next_line().await? {
      each(line)?;
    }
    debug!(path = %self.path().display(), lines = lines.line_number(), "Read each line");
    Ok(())
  }

  /// Create or replace the file with `text`
  pub async fn write(&self, text: &str) -> Result<()> {
    tokio::fs::write(self.path(), text)
      .await
      .map_err(StoreError::io("write", self.path()))
  }

  /// Create or replace the file with lines produced by `next`
  pub async fn write_each_line<F>(&self, mut next: F) -> Result<u64>
  where
    F: FnMut() -> Push,
  {
    let mut sink = LineSink::create(self.path()).await?;
    loop {
      match next() {
        Push::Line(line) => sink.write_line(&line).await?,
        Push::Skip => continue,
        Push::End => break,
      }
    }
    let written = sink.finish().await?;
    debug!(path = %self.path().display(), written, "Wrote each line");
    Ok(written)
  }

  /// Atomically rewrite the file line by line
  ///
  /// The file is renamed to `<path><temp_suffix>`, its lines are replayed
  /// through `each`, and the answers are written to a fresh file at the
  /// original path:
  ///
  /// - [`LineEdit::Keep`] writes the line unchanged
  /// - [`LineEdit::Replace`] writes the given text instead
  /// - [`LineEdit::Delete`] drops the line
  /// - [`LineEdit::End`] drops this and every remaining line
  ///
  /// Blank lines never reach `each`; they are copied through, except ahead
  /// of the first written line where they are dropped.
  ///
  /// The temp file is deleted once the new file is complete. Dropping the
  /// returned future early moves the original file back into place. Returns
  /// the number of bytes written. Fails with [`StoreError::TempExists`] if the
  /// temp path is taken.
  pub async fn replace_each_line<F>(&self, mut each: F) -> Result<u64>
  where
    F: FnMut(&str) -> Result<LineEdit>,
  {
    rewrite::replace_each_line(self, |_, line| each(line)).await
  }

  /// [`Self::replace_each_line`] with each line's 1-based line number in the file
  pub async fn replace_each_numbered_line<F>(&self, each: F) -> Result<u64>
  where
    F: FnMut(usize, &str) -> Result<LineEdit>,
  {
    rewrite::replace_each_line(self, each).await
  }

  /// Append raw text at the end of the file, creating it if needed
  pub async fn append(&self, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.path())
      .await
      .map_err(StoreError::io("open", self.path()))?;
    file
      .write_all(text.as_bytes())
      .await
      .map_err(StoreError::io("append", self.path()))?;
    file.flush().await.map_err(StoreError::io("flush", self.path()))
  }

  /// Append `text` followed by a newline as the new final line
  ///
  /// When the file does not end with a newline (its last record was written
  /// without one) a separating newline is inserted first so records never merge.
  pub async fn append_line(&self, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(self.path())
      .await
      .map_err(StoreError::io("open", self.path()))?;

    let len = file
      .metadata()
      .await
      .map_err(StoreError::io("stat", self.path()))?
      .len();

    let mut needs_separator = false;
    if len > 0 {
      let mut last = [0u8; 1];
      file
        .seek(SeekFrom::Start(len - 1))
        .await
        .map_err(StoreError::io("seek", self.path()))?;
      file
        .read_exact(&mut last)
        .await
        .map_err(StoreError::io("read", self.path()))?;
      needs_separator = last[0] != b'\n';
    }

    let mut payload = String::with_capacity(text.len() + 2);
    if needs_separator {
      payload.push('\n');
    }
    payload.push_str(text);
    payload.push('\n');

    file
      .write_all(payload.as_bytes())
      .await
      .map_err(StoreError::io("append", self.path()))?;
    file.flush().await.map_err(StoreError::io("flush", self.path()))
  }

  /// Move the file, returning the registry's handle for the destination
  pub async fn rename(&self, new_path: &Path) -> Result<FileHandle> {
    let registry = self.handle.inner.registry.upgrade().ok_or(StoreError::RegistryClosed)?;
    tokio::fs::rename(self.path(), new_path)
      .await
      .map_err(StoreError::io("rename", self.path()))?;
    let target = registry.handle(new_path);
    debug!(from = %self.path().display(), to = %target.path().display(), "Renamed file");
    Ok(target)
  }

  /// Delete the file
  pub async fn unlink(&self) -> Result<()> {
    tokio::fs::remove_file(self.path())
      .await
      .map_err(StoreError::io("unlink", self.path()))?;
    debug!(path = %self.path().display(), "Unlinked file");
    Ok(())
  }
}
