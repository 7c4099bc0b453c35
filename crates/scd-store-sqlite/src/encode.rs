//! Encoding and decoding helpers between core types and the representations
//! stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width UTC text (`%Y-%m-%dT%H:%M:%S%.6fZ`),
//! so lexical order equals chronological order and validity ranges can be
//! compared in SQL. `is_current` is stored as 0/1.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use scd_core::{
  fingerprint::Digest,
  record::{Record, Schema},
  value::Value,
  version::{Audit, HistoryRecord},
};

use crate::{Error, Result};

// ─── Value ───────────────────────────────────────────────────────────────────

pub fn encode_value(v: &Value) -> SqlValue {
  match v {
    Value::Null => SqlValue::Null,
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(r) => SqlValue::Real(*r),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Blob(b) => SqlValue::Blob(b.clone()),
  }
}

pub fn decode_value(v: SqlValue) -> Value {
  match v {
    SqlValue::Null => Value::Null,
    SqlValue::Integer(i) => Value::Integer(i),
    SqlValue::Real(r) => Value::Real(r),
    SqlValue::Text(s) => Value::Text(s),
    SqlValue::Blob(b) => Value::Blob(b),
  }
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// SQLite `GLOB` pattern matching exactly the text `TIMESTAMP_FORMAT` writes.
pub(crate) const TIMESTAMP_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T\
                                         [0-9][0-9]:[0-9][0-9]:[0-9][0-9].\
                                         [0-9][0-9][0-9][0-9][0-9][0-9]Z";

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.format(TIMESTAMP_FORMAT).to_string() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
    .map(|dt| dt.and_utc())
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw column values read from one history row.
pub struct RawVersion {
  pub data:       Vec<SqlValue>,
  pub digest:     String,
  pub valid_from: String,
  pub valid_to:   String,
  pub is_current: bool,
}

impl RawVersion {
  /// Read a row laid out as `<data columns...>, digest, valid_from, valid_to,
  /// is_current`.
  pub fn from_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Self> {
    let data = (0..width)
      .map(|i| row.get::<_, SqlValue>(i))
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Self {
      data,
      digest:     row.get(width)?,
      valid_from: row.get(width + 1)?,
      valid_to:   row.get(width + 2)?,
      is_current: row.get(width + 3)?,
    })
  }

  pub fn into_history(self, schema: &Arc<Schema>) -> Result<HistoryRecord> {
    let values = self.data.into_iter().map(decode_value).collect();
    let record = Record::new(schema.clone(), values)?;
    Ok(HistoryRecord {
      record,
      audit: Audit {
        digest:     Digest::from_stored(self.digest),
        valid_from: decode_dt(&self.valid_from)?,
        valid_to:   decode_dt(&self.valid_to)?,
        is_current: self.is_current,
      },
    })
  }
}
