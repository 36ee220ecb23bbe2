//! RowStore - a JSON Lines table over one FileHandle
//!
//! Each line of `<data_dir>/<table>.<ext>` is one JSON object carrying an
//! integer `id`. Insertion order is file order; there is no index beyond a
//! linear scan. Every operation runs inside a single queued slot on the
//! table's handle, so an id computed by a scan is still free when the row is
//! appended.

use std::{ops::ControlFlow, path::Path};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
  error::{Result, StoreError},
  handle::{Exclusive, FileHandle},
  registry::Registry,
  rewrite::LineEdit,
  row::Row,
};

/// Answer of a [`RowStore::update`] visitor
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate {
  /// Leave the stored line byte for byte as it is
  Keep,
  /// Remove the row
  Delete,
  /// Store this row instead
  Replace(Row),
}

/// A table bound to one file, holding one current row in memory
#[derive(Debug, Clone)]
pub struct RowStore {
  table: String,
  handle: FileHandle,
  row: Row,
  synced_at: Option<DateTime<Utc>>,
}

impl RowStore {
  /// Open `table` under the registry's data dir with an empty current row
  pub fn new(registry: &Registry, table: &str) -> Result<Self> {
    validate_table(table)?;
    let file = format!("{}.{}", table, registry.config().table_extension);
    let handle = registry.handle(registry.data_dir().join(file));
    Ok(Self {
      table: table.to_string(),
      handle,
      row: Row::new(),
      synced_at: None,
    })
  }

  /// Open `table` with a current row identified by `id` (call [`RowStore::load`] next)
  pub fn with_id(registry: &Registry, table: &str, id: i64) -> Result<Self> {
    Self::from_row(registry, table, Row::new().with_id(id))
  }

  /// Open `table` with `row` as the current row
  pub fn from_row(registry: &Registry, table: &str, row: Row) -> Result<Self> {
    let mut store = Self::new(registry, table)?;
    store.row = row;
    Ok(store)
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  /// Path of the table file
  pub fn path(&self) -> &Path {
    self.handle.path()
  }

  pub fn handle(&self) -> &FileHandle {
    &self.handle
  }

  /// The current row
  pub fn row(&self) -> &Row {
    &self.row
  }

  pub fn row_mut(&mut self) -> &mut Row {
    &mut self.row
  }

  pub fn id(&self) -> Option<i64> {
    self.row.id()
  }

  /// Field of the current row (no I/O)
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.row.get(name)
  }

  /// Set a field of the current row (no I/O)
  pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
    self.row.set(name, value)?;
    Ok(self)
  }

  /// When the current row last matched the file (load, save or insert)
  pub fn synced_at(&self) -> Option<DateTime<Utc>> {
    self.synced_at
  }

  // ==========================================================================
  // Persistence
  // ==========================================================================

  /// Replace the current row with the stored row carrying the same id
  ///
  /// The first matching line wins. Returns false when no line matched.
  pub async fn load(&mut self) -> Result<bool> {
    let id = self
      .row
      .id()
      .ok_or_else(|| StoreError::Argument("cannot load a row without an id".to_string()))?;

    let exclusive = self.handle.lock().await;
    let mut found = None;
    scan(&exclusive, |row| {
      if row.id() == Some(id) {
        found = Some(row);
        return Ok(ControlFlow::Break(()));
      }
      Ok(ControlFlow::Continue(()))
    })
    .await?;
    drop(exclusive);

    let Some(row) = found else {
      debug!(table = %self.table, id, "Row not found");
      return Ok(false);
    };
    self.row = row;
    self.synced_at = Some(Utc::now());
    debug!(table = %self.table, id, "Loaded row");
    Ok(true)
  }

  /// Persist the current row
  ///
  /// A row with an id replaces its stored line; every other line is kept
  /// unchanged. Fails with [`StoreError::RowNotFound`] if no line carries the
  /// id. A row without an id is inserted and adopts the new id.
  pub async fn save(&mut self) -> Result<()> {
    let Some(id) = self.row.id() else {
      self.row = self.insert(self.row.clone()).await?;
      return Ok(());
    };

    let exclusive = self.handle.lock().await;
    if !exclusive.try_exists().await? {
      return Err(StoreError::RowNotFound(id));
    }

    let text = self.row.to_line();
    let path = exclusive.path().to_path_buf();
    let mut matched = 0;
    exclusive
      .replace_each_numbered_line(|line_number, line| {
        if Row::decode(line, &path, line_number)?.id() != Some(id) {
          return Ok(LineEdit::Keep);
        }
        matched += 1;
        Ok(LineEdit::Replace(text.clone()))
      })
      .await?;

    if matched == 0 {
      return Err(StoreError::RowNotFound(id));
    }
    self.synced_at = Some(Utc::now());
    debug!(table = %self.table, id, "Saved row");
    Ok(())
  }

  /// Append `row` with the next free id, returning the stored row
  ///
  /// The id scan and the append share one slot on the table's handle.
  pub async fn insert(&mut self, row: Row) -> Result<Row> {
    let exclusive = self.handle.lock().await;
    let id = next_id(&exclusive).await?;
    let row = row.with_id(id);

    if let Some(parent) = exclusive.path().parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(StoreError::io("create_dir", parent))?;
    }
    exclusive.append_line(&row.to_line()).await?;

    self.synced_at = Some(Utc::now());
    debug!(table = %self.table, id, "Inserted row");
    Ok(row)
  }

  /// One more than the largest stored id, or 1 for an empty or absent table
  pub async fn next_id(&self) -> Result<i64> {
    let exclusive = self.handle.lock().await;
    next_id(&exclusive).await
  }

  /// Visit every stored row in file order (read-only)
  pub async fn select<F>(&self, mut each: F) -> Result<()>
  where
    F: FnMut(Row) -> Result<()>,
  {
    let exclusive = self.handle.lock().await;
    scan(&exclusive, |row| {
      each(row)?;
      Ok(ControlFlow::Continue(()))
    })
    .await
  }

  /// Every stored row in file order
  pub async fn rows(&self) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    self
      .select(|row| {
        rows.push(row);
        Ok(())
      })
      .await?;
    Ok(rows)
  }

  /// Rewrite the table row by row
  ///
  /// Returns the bytes written; an absent table is left absent and yields 0.
  /// If `each` fails, the remaining rows are kept as they are and the error
  /// is returned.
  pub async fn update<F>(&self, mut each: F) -> Result<u64>
  where
    F: FnMut(&Row) -> Result<RowUpdate>,
  {
    let exclusive = self.handle.lock().await;
    if !exclusive.try_exists().await? {
      return Ok(0);
    }

    let path = exclusive.path().to_path_buf();
    let mut rows = 0;
    let written = exclusive
      .replace_each_numbered_line(|line_number, line| {
        rows += 1;
        let row = Row::decode(line, &path, line_number)?;
        Ok(match each(&row)? {
          RowUpdate::Keep => LineEdit::Keep,
          RowUpdate::Delete => LineEdit::Delete,
          RowUpdate::Replace(row) => LineEdit::Replace(row.to_line()),
        })
      })
      .await?;

    debug!(table = %self.table, rows, written, "Updated table");
    Ok(written)
  }

  /// Remove the row with `id`, returning whether it existed
  pub async fn delete(&self, id: i64) -> Result<bool> {
    let mut deleted = false;
    self
      .update(|row| {
        if row.id() == Some(id) {
          deleted = true;
          return Ok(RowUpdate::Delete);
        }
        Ok(RowUpdate::Keep)
      })
      .await?;
    Ok(deleted)
  }
}

/// Decode every non-blank line until `each` breaks
///
/// An absent table has no rows.
async fn scan<F>(exclusive: &Exclusive, mut each: F) -> Result<()>
where
  F: FnMut(Row) -> Result<ControlFlow<()>>,
{
  if !exclusive.try_exists().await? {
    trace!(path = %exclusive.path().display(), "Scan of absent table");
    return Ok(());
  }

  let mut lines = exclusive.lines().await?;
  while let Some(line) = lines.next_line().await? {
    if line.is_empty() {
      continue;
    }
    let row = Row::decode(&line, exclusive.path(), lines.line_number())?;
    if each(row)?.is_break() {
      break;
    }
  }
  Ok(())
}

async fn next_id(exclusive: &Exclusive) -> Result<i64> {
  let mut max = None;
  scan(exclusive, |row| {
    if let Some(id) = row.id() {
      max = max.max(Some(id));
    }
    Ok(ControlFlow::Continue(()))
  })
  .await?;
  match max {
    None => Ok(1),
    Some(id) => id
      .checked_add(1)
      .ok_or_else(|| StoreError::Argument(format!("id {id} leaves no room for another row"))),
  }
}

/// Table names become file names and must stay inside the data dir
fn validate_table(table: &str) -> Result<()> {
  if table.is_empty()
    || table == "."
    || table == ".."
    || table.contains(['/', '\\', '\0'])
  {
    return Err(StoreError::Argument(format!("invalid table name: {table:?}")));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use rowfile_core::StoreConfig;
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;

  fn setup() -> (TempDir, Registry) {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(StoreConfig {
      data_dir: Some(dir.path().to_path_buf()),
      ..StoreConfig::default()
    });
    (dir, registry)
  }

  fn row(value: Value) -> Row {
    Row::try_from(value).unwrap()
  }

  #[test]
  fn test_table_path_and_validation() {
    let (dir, registry) = setup();
    let store = registry.table("Users").unwrap();
    assert_eq!(store.path(), dir.path().join("Users.bson"));

    for bad in ["", ".", "..", "a/b", "a\\b"] {
      assert!(matches!(registry.table(bad), Err(StoreError::Argument(_))), "{bad:?} accepted");
    }
  }

  #[test]
  fn test_stores_share_the_table_handle() {
    let (_dir, registry) = setup();
    let a = registry.table("Users").unwrap();
    let b = RowStore::with_id(&registry, "Users", 3).unwrap();
    assert!(a.handle().same_as(b.handle()));
    assert_eq!(b.id(), Some(3));
  }

  #[tokio::test]
  async fn test_load_without_id_is_argument_error() {
    let (_dir, registry) = setup();
    let mut store = registry.table("Users").unwrap();
    assert!(matches!(store.load().await, Err(StoreError::Argument(_))));
  }

  #[tokio::test]
  async fn test_load_first_match_wins() {
    let (dir, registry) = setup();
    std::fs::write(
      dir.path().join("Users.bson"),
      "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n{\"id\":2,\"name\":\"dup\"}\n",
    )
    .unwrap();

    let mut store = RowStore::with_id(&registry, "Users", 2).unwrap();
    assert!(store.synced_at().is_none());
    assert!(store.load().await.unwrap());
    assert_eq!(store.get("name"), Some(&json!("b")));
    assert!(store.synced_at().is_some());

    let mut missing = RowStore::with_id(&registry, "Users", 9).unwrap();
    assert!(!missing.load().await.unwrap());
  }

  #[tokio::test]
  async fn test_load_from_absent_table() {
    let (_dir, registry) = setup();
    let mut store = RowStore::with_id(&registry, "Ghosts", 1).unwrap();
    assert!(!store.load().await.unwrap());
  }

  #[tokio::test]
  async fn test_insert_assigns_increasing_ids() {
    let (dir, registry) = setup();
    let mut store = registry.table("Users").unwrap();

    let first = store.insert(row(json!({"name": "a"}))).await.unwrap();
    let second = store.insert(row(json!({"name": "b", "id": 77}))).await.unwrap();
    assert_eq!(first.id(), Some(1));
    assert_eq!(second.id(), Some(2));
    assert_eq!(
      std::fs::read_to_string(dir.path().join("Users.bson")).unwrap(),
      "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n"
    );
  }

  #[tokio::test]
  async fn test_insert_creates_data_dir() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::new(StoreConfig {
      data_dir: Some(dir.path().join("nested/tables")),
      ..StoreConfig::default()
    });
    let mut store = registry.table("Users").unwrap();
    store.insert(row(json!({"name": "a"}))).await.unwrap();
    assert!(dir.path().join("nested/tables/Users.bson").exists());
  }

  #[tokio::test]
  async fn test_save_without_id_inserts() {
    let (_dir, registry) = setup();
    let mut store = registry.table("Users").unwrap();
    store.set("name", "new").unwrap();
    store.save().await.unwrap();
    assert_eq!(store.id(), Some(1));
    assert!(store.synced_at().is_some());
  }

  #[tokio::test]
  async fn test_save_unknown_id_is_row_not_found() {
    let (dir, registry) = setup();
    let path = dir.path().join("Users.bson");
    std::fs::write(&path, "{\"id\":1}\n").unwrap();

    let mut store = RowStore::from_row(&registry, "Users", row(json!({"id": 5}))).unwrap();
    assert!(matches!(store.save().await, Err(StoreError::RowNotFound(5))));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"id\":1}\n");

    let mut absent = RowStore::from_row(&registry, "Posts", row(json!({"id": 1}))).unwrap();
    assert!(matches!(absent.save().await, Err(StoreError::RowNotFound(1))));
  }

  #[tokio::test]
  async fn test_update_replace_and_malformed_line() {
    let (dir, registry) = setup();
    let path = dir.path().join("Users.bson");
    std::fs::write(&path, "{\"id\":1,\"n\":1}\n{\"id\":2,\"n\":2}\n").unwrap();

    let store = registry.table("Users").unwrap();
    store
      .update(|r| {
        let mut r = r.clone();
        let n = r.get("n").and_then(Value::as_i64).unwrap_or(0);
        r.set("n", n * 10)?;
        Ok(RowUpdate::Replace(r))
      })
      .await
      .unwrap();
    assert_eq!(
      std::fs::read_to_string(&path).unwrap(),
      "{\"id\":1,\"n\":10}\n{\"id\":2,\"n\":20}\n"
    );

    std::fs::write(&path, "{\"id\":1}\nnot json\n{\"id\":3}\n").unwrap();
    let err = store.update(|_| Ok(RowUpdate::Delete)).await.unwrap_err();
    assert!(matches!(err, StoreError::Parse { line: 2, .. }));
    // Rows after the corrupt line survive
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json\n{\"id\":3}\n");
  }

  #[tokio::test]
  async fn test_next_id_after_max_id_is_argument_error() {
    let (dir, registry) = setup();
    let path = dir.path().join("Users.bson");
    std::fs::write(&path, format!("{{\"id\":{}}}\n", i64::MAX)).unwrap();

    let mut store = registry.table("Users").unwrap();
    assert!(matches!(store.next_id().await, Err(StoreError::Argument(_))));
    assert!(matches!(
      store.insert(row(json!({"name": "a"}))).await,
      Err(StoreError::Argument(_))
    ));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{{\"id\":{}}}\n", i64::MAX));
  }

  #[tokio::test]
  async fn test_unreachable_table_is_io_error() {
    let dir = TempDir::new().unwrap();
    let not_a_dir = dir.path().join("plain");
    std::fs::write(&not_a_dir, "").unwrap();
    let registry = Registry::new(StoreConfig {
      data_dir: Some(not_a_dir),
      ..StoreConfig::default()
    });

    let store = registry.table("Users").unwrap();
    assert!(matches!(store.next_id().await, Err(StoreError::Io { .. })));
    assert!(matches!(store.rows().await, Err(StoreError::Io { .. })));
    assert!(matches!(
      store.update(|_| Ok(RowUpdate::Delete)).await,
      Err(StoreError::Io { .. })
    ));

    let mut with_id = RowStore::from_row(&registry, "Users", row(json!({"id": 1}))).unwrap();
    assert!(matches!(with_id.save().await, Err(StoreError::Io { .. })));
  }

  #[tokio::test]
  async fn test_update_reports_physical_line_numbers() {
    let (dir, registry) = setup();
    let path = dir.path().join("Users.bson");
    std::fs::write(&path, "{\"id\":1}\n\nnot json\n").unwrap();

    let store = registry.table("Users").unwrap();
    let err = store.update(|_| Ok(RowUpdate::Keep)).await.unwrap_err();
    assert!(matches!(err, StoreError::Parse { line: 3, .. }));

    let mut saved = RowStore::from_row(&registry, "Users", row(json!({"id": 2}))).unwrap();
    assert!(matches!(saved.save().await, Err(StoreError::Parse { line: 3, .. })));
  }

  #[tokio::test]
  async fn test_update_absent_table_is_zero() {
    let (dir, registry) = setup();
    let store = registry.table("Ghosts").unwrap();
    assert_eq!(store.update(|_| Ok(RowUpdate::Delete)).await.unwrap(), 0);
    assert!(!dir.path().join("Ghosts.bson").exists());
  }

  #[tokio::test]
  async fn test_delete_reports_existence() {
    let (_dir, registry) = setup();
    let mut store = registry.table("Users").unwrap();
    store.insert(row(json!({"name": "a"}))).await.unwrap();

    assert!(store.delete(1).await.unwrap());
    assert!(!store.delete(1).await.unwrap());
    assert!(store.rows().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_scan_skips_blank_lines_and_rejects_invalid_rows() {
    let (dir, registry) = setup();
    let path = dir.path().join("Users.bson");
    std::fs::write(&path, "{\"id\":1}\n\n{\"id\":2}\n").unwrap();

    let store = registry.table("Users").unwrap();
    let ids: Vec<_> = store.rows().await.unwrap().iter().map(Row::id).collect();
    assert_eq!(ids, vec![Some(1), Some(2)]);

    std::fs::write(&path, "{\"id\":1}\n[]\n").unwrap();
    let err = store.rows().await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidRow { line: 2, .. }));
  }
}
