//! Queued single-writer file access and a JSON Lines row store
//!
//! Every path gets exactly one [`FileHandle`] from a [`Registry`]. The handle
//! runs operations on its file one at a time, in the order they were called,
//! so reads, appends and atomic rewrites of one file never interleave.
//! [`RowStore`] builds a small table abstraction on top: one JSON object per
//! line, each with an integer `id`.

pub mod error;
pub mod handle;
pub mod reader;
mod registry;
pub mod rewrite;
pub mod row;
pub mod table;

#[cfg(test)]
mod __tests__;

pub use error::{Result, StoreError};
pub use handle::{Exclusive, FileHandle, Lock, Push};
pub use reader::ChunkReader;
pub use registry::Registry;
pub use rewrite::LineEdit;
pub use row::{ID_FIELD, Row};
pub use table::{RowStore, RowUpdate};
