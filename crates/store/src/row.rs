//! Row - one JSON object per table line

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Name of the identifier field
pub const ID_FIELD: &str = "id";

/// A table record
///
/// Field order is preserved, so a row written back keeps the layout it was
/// read with. A row without an integer `id` is new; once an id is assigned
/// it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
  pub fn new() -> Self {
    Self::default()
  }

  /// Row's identifier, if it carries an integer one
  pub fn id(&self) -> Option<i64> {
    self.0.get(ID_FIELD).and_then(Value::as_i64)
  }

  /// Copy of the row with `id` as its first field
  pub fn with_id(&self, id: i64) -> Self {
    let mut fields = Map::with_capacity(self.0.len() + 1);
    fields.insert(ID_FIELD.to_string(), Value::from(id));
    for (name, value) in &self.0 {
      if name != ID_FIELD {
        fields.insert(name.clone(), value.clone());
      }
    }
    Self(fields)
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  /// Set a field in memory
  ///
  /// `id` must be an integer; setting it to null makes the row new again.
  pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
    let value = value.into();
    if name == ID_FIELD {
      match &value {
        Value::Null => {
          self.0.remove(ID_FIELD);
          return Ok(self);
        }
        v if v.as_i64().is_some() => {}
        other => {
          return Err(StoreError::Argument(format!("id must be an integer, got {other}")));
        }
      }
    }
    self.0.insert(name.to_string(), value);
    Ok(self)
  }

  /// Remove a field, returning its old value
  pub fn remove(&mut self, name: &str) -> Option<Value> {
    self.0.remove(name)
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_fields(self) -> Map<String, Value> {
    self.0
  }

  /// Single-line JSON for storage
  pub fn to_line(&self) -> String {
    Value::Object(self.0.clone()).to_string()
  }

  /// Decode one stored line
  ///
  /// `path` and `line` only feed the error.
  pub fn decode(text: &str, path: &Path, line: usize) -> Result<Self> {
    let value: Value = serde_json::from_str(text).map_err(|source| StoreError::Parse {
      path: path.to_path_buf(),
      line,
      source,
    })?;

    let Value::Object(fields) = value else {
      return Err(StoreError::InvalidRow {
        path: path.to_path_buf(),
        line,
        reason: "not a JSON object".to_string(),
      });
    };

    if let Some(id) = fields.get(ID_FIELD)
      && !id.is_null()
      && id.as_i64().is_none()
    {
      return Err(StoreError::InvalidRow {
        path: path.to_path_buf(),
        line,
        reason: format!("id must be an integer, got {id}"),
      });
    }

    Ok(Self(fields))
  }
}

impl fmt::Display for Row {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_line())
  }
}

impl From<Map<String, Value>> for Row {
  fn from(fields: Map<String, Value>) -> Self {
    Self(fields)
  }
}

impl TryFrom<Value> for Row {
  type Error = StoreError;

  fn try_from(value: Value) -> Result<Self> {
    match value {
      Value::Object(fields) => Ok(Self(fields)),
      other => Err(StoreError::Argument(format!("row data must be a JSON object, got {other}"))),
    }
  }
}
