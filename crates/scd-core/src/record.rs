//! Explicit row types: an ordered [`Schema`] per relation and [`Record`]s
//! whose values line up with it.

use std::sync::Arc;

use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::{Error, Result, value::Value};

/// The ordered column names of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
  columns: Vec<String>,
}

impl Schema {
  pub fn new<I, S>(columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { columns: columns.into_iter().map(Into::into).collect() }
  }

  pub fn columns(&self) -> &[String] { &self.columns }

  pub fn len(&self) -> usize { self.columns.len() }

  pub fn is_empty(&self) -> bool { self.columns.is_empty() }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c == name)
  }

  pub fn contains(&self, name: &str) -> bool { self.index_of(name).is_some() }
}

/// One row of a relation. Values are positionally aligned with the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  schema: Arc<Schema>,
  values: Vec<Value>,
}

impl Record {
  pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
    if values.len() != schema.len() {
      return Err(Error::InputValidation(format!(
        "row has {} values but the schema has {} columns",
        values.len(),
        schema.len()
      )));
    }
    Ok(Self { schema, values })
  }

  /// Build a record from `(column, value)` pairs; the schema follows the pair
  /// order.
  pub fn from_pairs<I, K, V>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
  {
    let (columns, values): (Vec<String>, Vec<Value>) = pairs
      .into_iter()
      .map(|(k, v)| (k.into(), v.into()))
      .unzip();
    Self { schema: Arc::new(Schema { columns }), values }
  }

  pub fn schema(&self) -> &Arc<Schema> { &self.schema }

  pub fn values(&self) -> &[Value] { &self.values }

  pub fn value_at(&self, index: usize) -> Option<&Value> { self.values.get(index) }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.schema.index_of(name).and_then(|i| self.values.get(i))
  }

  /// `(column, value)` pairs in schema order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.schema.columns.iter().map(String::as_str).zip(self.values.iter())
  }
}

impl Serialize for Record {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.values.len()))?;
    for (column, value) in self.iter() {
      map.serialize_entry(column, value)?;
    }
    map.end()
  }
}
