//! Chunked line reader
//!
//! Reads a file in fixed-size blocks at explicit offsets and reassembles
//! newline-delimited records across block boundaries. Only the bytes present
//! when the reader was opened are read.

use std::{
  io::SeekFrom,
  path::{Path, PathBuf},
};

use tokio::{
  fs::File,
  io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::trace;

use crate::error::{Result, StoreError};

/// Pull-based line stream over one file
///
/// Each call to [`ChunkReader::next_line`] is the continuation of the previous
/// line; nothing is read ahead beyond the current block.
pub struct ChunkReader {
  file: File,
  path: PathBuf,
  /// Size observed at open
  size: u64,
  /// Next byte offset to read
  offset: u64,
  chunk_size: usize,
  /// Accumulated bytes not yet delivered start at `start`
  buf: Vec<u8>,
  start: usize,
  line_number: usize,
  ended_with_newline: bool,
}

impl ChunkReader {
  /// Open `path` for reading in blocks of `chunk_size` bytes
  pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
    let file = File::open(path).await.map_err(StoreError::io("open", path))?;
    let size = file.metadata().await.map_err(StoreError::io("stat", path))?.len();

    // A one byte file cannot hold a record
    let size = if size <= 1 { 0 } else { size };

    trace!(path = %path.display(), size, chunk_size, "Opened chunk reader");
    Ok(Self {
      file,
      path: path.to_path_buf(),
      size,
      offset: 0,
      chunk_size: chunk_size.max(2),
      buf: Vec::new(),
      start: 0,
      line_number: 0,
      ended_with_newline: false,
    })
  }

  /// Next trimmed line, or `None` at end of file
  ///
  /// Trimming also strips the `\r` of a `\r\n` ending.
  ///
  /// Blank lines are delivered as empty strings so callers can keep the
  /// file's layout. A final remainder without a newline is delivered only
  /// when it is not blank.
  pub async fn next_line(&mut self) -> Result<Option<String>> {
    loop {
      if let Some(pos) = self.buf[self.start..].iter().position(|b| *b == b'\n') {
        let end = self.start + pos;
        let line = self.decode(self.start, end)?;
        self.start = end + 1;
        return Ok(Some(line));
      }

      if self.offset >= self.size {
        if self.start < self.buf.len() {
          let end = self.buf.len();
          let line = self.decode(self.start, end)?;
          self.start = end;
          if !line.is_empty() {
            return Ok(Some(line));
          }
        }
        return Ok(None);
      }

      self.fill().await?;
    }
  }

  /// Read the next block, dropping already delivered bytes first
  async fn fill(&mut self) -> Result<()> {
    if self.start > 0 {
      self.buf.drain(..self.start);
      self.start = 0;
    }

    let len = (self.size - self.offset).min(self.chunk_size as u64) as usize;
    let mut block = vec![0u8; len];
    self
      .file
      .seek(SeekFrom::Start(self.offset))
      .await
      .map_err(StoreError::io("seek", &self.path))?;
    self
      .file
      .read_exact(&mut block)
      .await
      .map_err(StoreError::io("read", &self.path))?;

    self.offset += len as u64;
    if self.offset >= self.size {
      self.ended_with_newline = block.last() == Some(&b'\n');
    }
    self.buf.extend_from_slice(&block);

    trace!(path = %self.path.display(), offset = self.offset, size = self.size, "Read chunk");
    Ok(())
  }

  fn decode(&mut self, from: usize, to: usize) -> Result<String> {
    self.line_number += 1;
    let text = std::str::from_utf8(&self.buf[from..to]).map_err(|e| StoreError::Io {
      op: "decode",
      path: self.path.clone(),
      source: std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("line {} is not valid UTF-8: {}", self.line_number, e),
      ),
    })?;
    Ok(text.trim().to_string())
  }

  /// 1-based number of the line last delivered (blank lines included)
  pub fn line_number(&self) -> usize {
    self.line_number
  }

  /// Bytes read from the file so far
  pub fn bytes_read(&self) -> u64 {
    self.offset
  }

  /// Whether the file's last byte is a newline
  ///
  /// Only meaningful once [`ChunkReader::next_line`] returned `None`.
  pub fn ended_with_newline(&self) -> bool {
    self.ended_with_newline
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}
