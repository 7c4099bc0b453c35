//! [`TxHistory`]: the history relation as seen from inside a run transaction.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use scd_core::{
  fingerprint::Digest,
  record::Record,
  store::HistoryTable,
  value::Value,
  version::{Audit, CurrentVersion},
};

use crate::{
  encode::{encode_dt, encode_value},
  schema::Layout,
};

/// Borrowed view over an open transaction. Statements are prepared once per
/// connection and reused for every row.
pub(crate) struct TxHistory<'a> {
  conn:   &'a rusqlite::Connection,
  layout: &'a Layout,
}

impl<'a> TxHistory<'a> {
  pub fn new(conn: &'a rusqlite::Connection, layout: &'a Layout) -> Self {
    Self { conn, layout }
  }
}

impl HistoryTable for TxHistory<'_> {
  type Error = rusqlite::Error;
  type VersionId = i64;

  fn current_versions(
    &mut self,
    key: &Value,
  ) -> rusqlite::Result<Vec<CurrentVersion<i64>>> {
    let mut stmt = self.conn.prepare_cached(&self.layout.lookup_current)?;
    stmt
      .query_map([encode_value(key)], |row| {
        Ok(CurrentVersion {
          id:     row.get(0)?,
          digest: Digest::from_stored(row.get::<_, String>(1)?),
        })
      })?
      .collect()
  }

  fn expire(&mut self, id: &i64, valid_to: DateTime<Utc>) -> rusqlite::Result<()> {
    let mut stmt = self.conn.prepare_cached(&self.layout.expire)?;
    let changed = stmt.execute(rusqlite::params![encode_dt(valid_to), id])?;
    if changed != 1 {
      return Err(rusqlite::Error::StatementChangedRows(changed));
    }
    Ok(())
  }

  fn insert(&mut self, record: &Record, audit: &Audit) -> rusqlite::Result<i64> {
    let params: Vec<SqlValue> = record
      .values()
      .iter()
      .map(encode_value)
      .chain([
        SqlValue::Text(audit.digest.as_str().to_owned()),
        SqlValue::Text(encode_dt(audit.valid_from)),
        SqlValue::Text(encode_dt(audit.valid_to)),
        SqlValue::Integer(i64::from(audit.is_current)),
      ])
      .collect();

    let mut stmt = self.conn.prepare_cached(&self.layout.insert)?;
    stmt.execute(rusqlite::params_from_iter(params))?;
    Ok(self.conn.last_insert_rowid())
  }
}
