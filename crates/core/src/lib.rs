pub mod config;
pub mod dirs;
pub mod error;

pub use config::{
  Config, DEFAULT_CHUNK_SIZE, DEFAULT_REWRITE_BUFFER, DEFAULT_TABLE_EXTENSION, DEFAULT_TEMP_SUFFIX, LogConfig,
  StoreConfig,
};
pub use error::{Error, Result};
