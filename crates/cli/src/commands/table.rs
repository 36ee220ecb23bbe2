//! Table commands (select, get, insert, set, delete, next-id, check)

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use store::{Registry, Row, RowStore, rewrite::temp_path};
use tracing::{error, warn};

/// Print every row of a table, one JSON object per line
pub async fn cmd_select(registry: &Registry, table: &str, pretty: bool) -> Result<()> {
  let store = registry.table(table)?;
  let mut count = 0;
  store
    .select(|row| {
      count += 1;
      print_row(&row, pretty);
      Ok(())
    })
    .await
    .with_context(|| format!("Failed to read table {}", table))?;

  if count == 0 {
    warn!(table, "Table is empty or absent");
  }
  Ok(())
}

/// Print the row with `id`
pub async fn cmd_get(registry: &Registry, table: &str, id: i64, pretty: bool) -> Result<()> {
  let mut store = RowStore::with_id(registry, table, id)?;
  let found = store
    .load()
    .await
    .with_context(|| format!("Failed to read table {}", table))?;

  if !found {
    error!("Row {} not found in {}", id, table);
    std::process::exit(1);
  }
  print_row(store.row(), pretty);
  Ok(())
}

/// Insert a JSON object, printing the id it was given
pub async fn cmd_insert(registry: &Registry, table: &str, data: &str) -> Result<()> {
  let value: Value = serde_json::from_str(data).context("Row data is not valid JSON")?;
  let row = Row::try_from(value)?;

  let mut store = registry.table(table)?;
  let row = store
    .insert(row)
    .await
    .with_context(|| format!("Failed to insert into {}", table))?;

  match row.id() {
    Some(id) => println!("{}", id),
    None => bail!("Inserted row has no id"),
  }
  Ok(())
}

/// Set one field of a stored row
///
/// `value` is parsed as JSON when possible, otherwise stored as a string.
pub async fn cmd_set(registry: &Registry, table: &str, id: i64, field: &str, value: &str) -> Result<()> {
  let mut store = RowStore::with_id(registry, table, id)?;
  if !store.load().await? {
    error!("Row {} not found in {}", id, table);
    std::process::exit(1);
  }

  store.set(field, parse_value(value))?;
  store
    .save()
    .await
    .with_context(|| format!("Failed to save row {} in {}", id, table))?;

  println!("Updated row {} in {}", id, table);
  Ok(())
}

/// Delete the row with `id`
pub async fn cmd_delete(registry: &Registry, table: &str, id: i64) -> Result<()> {
  let store = registry.table(table)?;
  let deleted = store
    .delete(id)
    .await
    .with_context(|| format!("Failed to rewrite {}", table))?;

  if !deleted {
    error!("Row {} not found in {}", id, table);
    std::process::exit(1);
  }
  println!("Deleted row {} from {}", id, table);
  Ok(())
}

/// Print the id the next insert would get
pub async fn cmd_next_id(registry: &Registry, table: &str) -> Result<()> {
  let store = registry.table(table)?;
  println!("{}", store.next_id().await?);
  Ok(())
}

/// Summary of a table scan
#[derive(Debug, Default, PartialEq)]
pub struct TableReport {
  pub rows: usize,
  pub without_id: usize,
  pub max_id: Option<i64>,
  pub duplicate_ids: Vec<i64>,
  pub leftover_temp: bool,
}

impl TableReport {
  pub fn is_healthy(&self) -> bool {
    self.without_id == 0 && self.duplicate_ids.is_empty() && !self.leftover_temp
  }
}

/// Scan a table and report problems that would trip up other commands
pub async fn check_table(registry: &Registry, table: &str) -> Result<TableReport> {
  let store = registry.table(table)?;
  let mut report = TableReport::default();
  let mut seen = BTreeSet::new();
  let mut duplicates = BTreeSet::new();

  store
    .select(|row| {
      report.rows += 1;
      match row.id() {
        Some(id) => {
          if !seen.insert(id) {
            duplicates.insert(id);
          }
          report.max_id = report.max_id.max(Some(id));
        }
        None => report.without_id += 1,
      }
      Ok(())
    })
    .await
    .with_context(|| format!("Table {} is corrupt", table))?;

  report.duplicate_ids = duplicates.into_iter().collect();
  report.leftover_temp = temp_path(store.path(), &registry.config().temp_suffix).exists();
  Ok(report)
}

pub async fn cmd_check(registry: &Registry, table: &str, json_output: bool) -> Result<()> {
  let report = check_table(registry, table).await?;

  if json_output {
    let value = serde_json::json!({
      "table": table,
      "rows": report.rows,
      "without_id": report.without_id,
      "max_id": report.max_id,
      "duplicate_ids": report.duplicate_ids,
      "leftover_temp": report.leftover_temp,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
  } else {
    println!("Table:          {}", table);
    println!("Rows:           {}", report.rows);
    println!(
      "Max id:         {}",
      report.max_id.map_or_else(|| "-".to_string(), |id| id.to_string())
    );
    if report.without_id > 0 {
      println!("Without id:     {}", report.without_id);
    }
    if !report.duplicate_ids.is_empty() {
      println!("Duplicate ids:  {:?}", report.duplicate_ids);
    }
    if report.leftover_temp {
      println!("Leftover temp file blocks rewrites; inspect and remove it");
    }
  }

  if !report.is_healthy() {
    std::process::exit(1);
  }
  Ok(())
}

fn parse_value(text: &str) -> Value {
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn print_row(row: &Row, pretty: bool) {
  if pretty {
    match serde_json::to_string_pretty(row) {
      Ok(text) => println!("{}", text),
      Err(e) => error!("Failed to format row: {}", e),
    }
  } else {
    println!("{}", row);
  }
}
