//! Table naming, schema introspection, and the SQL derived from it.
//!
//! The tables themselves are provisioned outside this crate. Here we only
//! read their column lists via `pragma_table_info`, check them against the
//! run configuration, and build the statements a run needs.

use std::sync::Arc;

use scd_core::{
  Error as CoreError, Phase,
  config::{Plan, RunConfig},
  record::Schema,
};
use serde::{Deserialize, Serialize};

use crate::encode::{TIMESTAMP_FORMAT, TIMESTAMP_GLOB};

// ─── Naming ──────────────────────────────────────────────────────────────────

/// Names of the four audit columns in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditColumns {
  pub digest:     String,
  pub valid_from: String,
  pub valid_to:   String,
  pub is_current: String,
}

impl Default for AuditColumns {
  fn default() -> Self {
    Self {
      digest:     "digest".into(),
      valid_from: "valid_from".into(),
      valid_to:   "valid_to".into(),
      is_current: "is_current".into(),
    }
  }
}

impl AuditColumns {
  pub fn names(&self) -> [&str; 4] {
    [&self.digest, &self.valid_from, &self.valid_to, &self.is_current]
  }
}

/// Which tables a run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
  pub source:  String,
  pub history: String,
  pub audit:   AuditColumns,
}

impl TableSpec {
  /// Tables for `source`, with history in `<source>_cdc`.
  pub fn new(source: impl Into<String>) -> Self {
    let source = source.into();
    let history = format!("{source}_cdc");
    Self { source, history, audit: AuditColumns::default() }
  }

  pub fn with_history(mut self, history: impl Into<String>) -> Self {
    self.history = history.into();
    self
  }

  pub fn with_audit(mut self, audit: AuditColumns) -> Self {
    self.audit = audit;
    self
  }
}

// ─── Introspection ───────────────────────────────────────────────────────────

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
  names.into_iter().map(quote_ident).collect::<Vec<_>>().join(", ")
}

/// Column names of `table` in declaration order; empty if it does not exist.
pub(crate) fn table_columns(
  conn: &rusqlite::Connection,
  table: &str,
) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
  stmt
    .query_map([table], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()
}

fn config_error(msg: String) -> CoreError { CoreError::Configuration(msg) }

// ─── History shape (reads) ───────────────────────────────────────────────────

/// The history table split into data columns and audit columns.
#[derive(Debug, Clone)]
pub(crate) struct HistoryShape {
  /// Non-audit columns, in table order.
  pub data:   Arc<Schema>,
  pub table:  String,
  pub key:    String,
  pub audit:  AuditColumns,
  /// `SELECT <data>, <audit> FROM <history>` with no trailing clauses.
  pub select: String,
}

impl HistoryShape {
  pub fn from_columns(
    spec: &TableSpec,
    key_column: &str,
    history_columns: Vec<String>,
  ) -> Result<Self, CoreError> {
    if history_columns.is_empty() {
      return Err(config_error(format!("history table {:?} does not exist", spec.history)));
    }
    for audit in spec.audit.names() {
      if !history_columns.iter().any(|c| c == audit) {
        return Err(config_error(format!(
          "history table {:?} is missing audit column {audit:?}",
          spec.history
        )));
      }
    }

    let audit_names = spec.audit.names();
    let data: Vec<String> = history_columns
      .into_iter()
      .filter(|c| !audit_names.contains(&c.as_str()))
      .collect();
    if !data.iter().any(|c| c == key_column) {
      return Err(config_error(format!(
        "primary key {key_column:?} is not a column of history table {:?}",
        spec.history
      )));
    }

    let select = format!(
      "SELECT {}, {} FROM {}",
      quote_list(data.iter().map(String::as_str)),
      quote_list(audit_names),
      quote_ident(&spec.history),
    );

    Ok(Self {
      data: Arc::new(Schema::new(data)),
      table: spec.history.clone(),
      key: key_column.to_owned(),
      audit: spec.audit.clone(),
      select,
    })
  }

  pub fn chain_sql(&self) -> String {
    format!(
      "{} WHERE {} = ?1 ORDER BY {}, rowid",
      self.select,
      quote_ident(&self.key),
      quote_ident(&self.audit.valid_from),
    )
  }

  /// Single range comparison; `?2` is the instant being asked about.
  pub fn as_of_sql(&self) -> String {
    format!(
      "{select} WHERE {key} = ?1 AND {from} <= ?2 AND ?2 < {to} ORDER BY {from} DESC LIMIT 1",
      select = self.select,
      key = quote_ident(&self.key),
      from = quote_ident(&self.audit.valid_from),
      to = quote_ident(&self.audit.valid_to),
    )
  }

  /// Counts rows whose digest or validity bounds were not written in this
  /// crate's format: a 64-char lowercase hex digest and fixed-width UTC text.
  /// Lexical range queries are only sound over such rows.
  pub fn foreign_rows_sql(&self) -> String {
    let t = quote_ident(&self.table);
    let d = quote_ident(&self.audit.digest);
    let from = quote_ident(&self.audit.valid_from);
    let to = quote_ident(&self.audit.valid_to);
    let ts = TIMESTAMP_GLOB;
    format!(
      "SELECT COUNT(*) FROM {t} WHERE NOT (
         typeof({d}) = 'text' AND length({d}) = 64 AND {d} NOT GLOB '*[^0-9a-f]*'
         AND typeof({from}) = 'text' AND {from} GLOB '{ts}'
         AND typeof({to}) = 'text' AND {to} GLOB '{ts}'
       )"
    )
  }

  pub fn integrity_sql(&self) -> IntegritySql {
    let t = quote_ident(&self.table);
    let k = quote_ident(&self.key);
    let cur = quote_ident(&self.audit.is_current);
    let to = quote_ident(&self.audit.valid_to);
    IntegritySql {
      totals:       format!(
        "SELECT COUNT(DISTINCT {k}), COUNT(*), COALESCE(SUM({cur} = 1), 0) FROM {t}"
      ),
      without:      format!("SELECT {k} FROM {t} GROUP BY {k} HAVING SUM({cur} = 1) = 0"),
      multiple:     format!("SELECT {k} FROM {t} GROUP BY {k} HAVING SUM({cur} = 1) > 1"),
      inconsistent: format!("SELECT COUNT(*) FROM {t} WHERE ({cur} = 1) <> ({to} = ?1)"),
    }
  }
}

/// Refuse a history table holding rows in a foreign format, such as MD5
/// digests or second-resolution timestamps.
pub(crate) fn ensure_native_rows(
  conn: &rusqlite::Connection,
  foreign_rows_sql: &str,
  table: &str,
) -> Result<(), CoreError> {
  let foreign: i64 = conn
    .query_row(foreign_rows_sql, [], |r| r.get(0))
    .map_err(|e| CoreError::data_access(Phase::Configuration, e))?;
  if foreign > 0 {
    return Err(config_error(format!(
      "history table {table:?} has {foreign} row(s) not in the expected format \
       (SHA-256 hex digest, {TIMESTAMP_FORMAT} UTC timestamps); migrate it first"
    )));
  }
  Ok(())
}

pub(crate) struct IntegritySql {
  pub totals:       String,
  pub without:      String,
  pub multiple:     String,
  pub inconsistent: String,
}

// ─── Run layout (writes) ─────────────────────────────────────────────────────

/// Everything a run needs: the bound plan and the statements it issues.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
  pub plan:           Plan,
  pub history:        String,
  pub foreign_rows:   String,
  pub select_source:  String,
  pub preflight:      String,
  pub lookup_current: String,
  pub expire:         String,
  pub insert:         String,
}

/// Introspect both tables and check them against `config`.
pub(crate) fn resolve_layout(
  conn: &rusqlite::Connection,
  spec: &TableSpec,
  config: &RunConfig,
) -> Result<Layout, CoreError> {
  let introspect = |table: &str| {
    table_columns(conn, table).map_err(|e| CoreError::data_access(Phase::Configuration, e))
  };
  let source_columns = introspect(&spec.source)?;
  let history_columns = introspect(&spec.history)?;

  if source_columns.is_empty() {
    return Err(config_error(format!("source table {:?} does not exist", spec.source)));
  }

  let audit = &spec.audit;
  let audit_names = audit.names();
  for (i, name) in audit_names.iter().enumerate() {
    if audit_names[..i].contains(name) {
      return Err(config_error(format!("audit column {name:?} is configured twice")));
    }
    if source_columns.iter().any(|c| c == name) {
      return Err(config_error(format!(
        "audit column {name:?} collides with a column of source table {:?}",
        spec.source
      )));
    }
  }

  let shape = HistoryShape::from_columns(spec, config.primary_key(), history_columns)?;
  for column in &source_columns {
    if !shape.data.contains(column) {
      return Err(config_error(format!(
        "source column {column:?} is missing from history table {:?}",
        spec.history
      )));
    }
  }

  let plan = config.bind(Arc::new(Schema::new(source_columns)))?;
  let columns = plan.source_schema().columns();

  let source = quote_ident(&spec.source);
  let history = quote_ident(&spec.history);
  let key = quote_ident(config.primary_key());
  let digest = quote_ident(&audit.digest);
  let valid_to = quote_ident(&audit.valid_to);
  let is_current = quote_ident(&audit.is_current);

  let insert_columns = quote_list(
    columns.iter().map(String::as_str).chain(audit_names),
  );
  let placeholders = (1..=columns.len() + audit_names.len())
    .map(|i| format!("?{i}"))
    .collect::<Vec<_>>()
    .join(", ");

  Ok(Layout {
    history:        spec.history.clone(),
    foreign_rows:   shape.foreign_rows_sql(),
    select_source:  format!(
      "SELECT {} FROM {source}",
      quote_list(columns.iter().map(String::as_str))
    ),
    preflight:      format!(
      "SELECT {key}, COUNT(*) FROM {history}
       WHERE {is_current} = 1
       GROUP BY {key}
       HAVING COUNT(*) > 1
       LIMIT 1"
    ),
    lookup_current: format!(
      "SELECT rowid, {digest} FROM {history} WHERE {key} = ?1 AND {is_current} = 1"
    ),
    expire:         format!(
      "UPDATE {history} SET {valid_to} = ?1, {is_current} = 0
       WHERE rowid = ?2 AND {is_current} = 1"
    ),
    insert:         format!(
      "INSERT INTO {history} ({insert_columns}) VALUES ({placeholders})"
    ),
    plan,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identifiers_are_quoted() {
    assert_eq!(quote_ident("price"), "\"price\"");
    assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
  }

  #[test]
  fn history_defaults_to_cdc_suffix() {
    let spec = TableSpec::new("sales_records");
    assert_eq!(spec.history, "sales_records_cdc");
    assert_eq!(spec.audit.names(), ["digest", "valid_from", "valid_to", "is_current"]);
  }

  #[test]
  fn shape_splits_audit_columns_off() {
    let spec = TableSpec::new("s");
    let cols = ["id", "name", "digest", "valid_from", "valid_to", "is_current"]
      .map(String::from)
      .to_vec();
    let shape = HistoryShape::from_columns(&spec, "id", cols).unwrap();
    assert_eq!(shape.data.columns(), ["id", "name"]);
  }

  #[test]
  fn shape_requires_every_audit_column() {
    let spec = TableSpec::new("s");
    let cols = ["id", "name", "digest", "valid_from"].map(String::from).to_vec();
    let err = HistoryShape::from_columns(&spec, "id", cols).unwrap_err();
    assert!(matches!(err, CoreError::Configuration(ref m) if m.contains("valid_to")));
  }
}
