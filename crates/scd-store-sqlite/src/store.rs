//! [`SqliteStore`]: runs reconciliation against a SQLite file and reads
//! history back out.

use std::{path::Path, time::Instant};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior, types::Value as SqlValue};
use tracing::{info, warn};
use uuid::Uuid;

use scd_core::{
  Error as CoreError, Phase,
  config::RunConfig,
  engine,
  record::Record,
  report::{IntegrityReport, RunReport, RunSummary},
  value::Value,
  version::{FAR_FUTURE, HistoryRecord},
};

use crate::{
  Result,
  encode::{RawVersion, decode_value, encode_dt, encode_value},
  history::TxHistory,
  schema::{HistoryShape, Layout, TableSpec, ensure_native_rows, resolve_layout, table_columns},
};

// ─── Options ─────────────────────────────────────────────────────────────────

/// Per-run knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
  /// Timestamp stamped on every version written by the run; defaults to the
  /// moment the run starts.
  pub run_at:  Option<DateTime<Utc>>,
  /// Classify and write inside the transaction, then roll back.
  pub dry_run: bool,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A handle to a provisioned SQLite database holding a source and a history
/// table.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open the database at `path`. Tables are expected to exist already.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Ok(Self { conn })
  }

  /// Open a private in-memory database.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Ok(Self { conn })
  }

  #[cfg(test)]
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  // ── Runs ──────────────────────────────────────────────────────────────────

  /// Reconcile `tables.source` into `tables.history` in one transaction.
  ///
  /// On success every write is committed (or, for a dry run, rolled back)
  /// and a report is returned. On any error nothing is persisted.
  pub async fn run(
    &self,
    config: &RunConfig,
    tables: &TableSpec,
    options: RunOptions,
  ) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let run_at = options.run_at.unwrap_or_else(Utc::now);
    let started = Instant::now();

    info!(
      %run_id,
      source = %tables.source,
      history = %tables.history,
      key = config.primary_key(),
      monitored = ?config.changing_attributes(),
      "starting run"
    );

    let config_owned = config.clone();
    let spec = tables.clone();
    let outcome = self
      .conn
      .call(move |conn| {
        Ok(run_in_transaction(conn, &config_owned, &spec, run_at, options.dry_run))
      })
      .await?;

    let summary = match outcome {
      Ok(summary) => summary,
      Err(e) => {
        warn!(%run_id, phase = %e.phase(), error = %e, "run failed; transaction rolled back");
        return Err(e.into());
      }
    };

    let report = RunReport {
      run_id,
      run_at,
      source_table: tables.source.clone(),
      history_table: tables.history.clone(),
      dry_run: options.dry_run,
      elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
      summary,
    };

    info!(
      %run_id,
      new = summary.new_count,
      changed = summary.changed_count,
      unchanged = summary.unchanged_count,
      total = summary.total_count,
      dry_run = options.dry_run,
      "run complete"
    );

    Ok(report)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// Introspect the history table and refuse it if any row is in a foreign
  /// format.
  async fn history_shape(&self, tables: &TableSpec, key_column: &str) -> Result<HistoryShape> {
    let spec = tables.clone();
    let key_column = key_column.to_owned();
    let shape = self
      .conn
      .call(move |conn| {
        let columns = table_columns(conn, &spec.history)?;
        Ok(HistoryShape::from_columns(&spec, &key_column, columns).and_then(|shape| {
          ensure_native_rows(conn, &shape.foreign_rows_sql(), &spec.history)?;
          Ok(shape)
        }))
      })
      .await??;
    Ok(shape)
  }

  /// Every version of `key`, oldest first.
  pub async fn history(
    &self,
    tables: &TableSpec,
    key_column: &str,
    key: &Value,
  ) -> Result<Vec<HistoryRecord>> {
    let shape = self.history_shape(tables, key_column).await?;
    let sql = shape.chain_sql();
    let width = shape.data.len();
    let key = encode_value(key);

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([key], |row| RawVersion::from_row(row, width))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|raw| raw.into_history(&shape.data)).collect()
  }

  /// The version of `key` that was current at `at`, if any.
  pub async fn as_of(
    &self,
    tables: &TableSpec,
    key_column: &str,
    key: &Value,
    at: DateTime<Utc>,
  ) -> Result<Option<HistoryRecord>> {
    let shape = self.history_shape(tables, key_column).await?;
    let sql = shape.as_of_sql();
    let width = shape.data.len();
    let key = encode_value(key);
    let at = encode_dt(at);

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![key, at], |row| {
              RawVersion::from_row(row, width)
            })
            .optional()?,
        )
      })
      .await?;

    raw.map(|raw| raw.into_history(&shape.data)).transpose()
  }

  /// Scan the whole history table for breaches of the one-current-version
  /// invariant.
  pub async fn check_integrity(
    &self,
    tables: &TableSpec,
    key_column: &str,
  ) -> Result<IntegrityReport> {
    let shape = self.history_shape(tables, key_column).await?;
    let sql = shape.integrity_sql();

    let report = self
      .conn
      .call(move |conn| {
        let (keys, versions, current_versions): (i64, i64, i64) =
          conn.query_row(&sql.totals, [], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;

        let collect_keys = |query: &str| -> rusqlite::Result<Vec<String>> {
          let mut stmt = conn.prepare(query)?;
          stmt
            .query_map([], |r| r.get::<_, SqlValue>(0))?
            .map(|v| v.map(|v| decode_value(v).to_string()))
            .collect()
        };
        let keys_without_current = collect_keys(&sql.without)?;
        let keys_with_multiple_current = collect_keys(&sql.multiple)?;

        let inconsistent: i64 =
          conn.query_row(&sql.inconsistent, [FAR_FUTURE], |r| r.get(0))?;

        Ok(IntegrityReport {
          keys: count(keys),
          versions: count(versions),
          current_versions: count(current_versions),
          keys_without_current,
          keys_with_multiple_current,
          inconsistent_flags: count(inconsistent),
        })
      })
      .await?;

    Ok(report)
  }
}

fn count(n: i64) -> usize { usize::try_from(n).unwrap_or(0) }

// ─── Run body (database thread) ──────────────────────────────────────────────

fn run_in_transaction(
  conn: &mut rusqlite::Connection,
  config: &RunConfig,
  spec: &TableSpec,
  run_at: DateTime<Utc>,
  dry_run: bool,
) -> Result<RunSummary, CoreError> {
  // IMMEDIATE takes the write lock up front: one writer per run.
  let tx = conn
    .transaction_with_behavior(TransactionBehavior::Immediate)
    .map_err(|e| CoreError::data_access(Phase::Preflight, e))?;

  let layout = resolve_layout(&tx, spec, config)?;
  preflight(&tx, &layout)?;

  let rows = extract(&tx, &layout)?;
  info!(rows = rows.len(), source = %spec.source, "extracted source snapshot");

  let summary = {
    let mut history = TxHistory::new(&tx, &layout);
    engine::reconcile(&layout.plan, rows, &mut history, run_at)?
  };

  if dry_run {
    tx.rollback().map_err(|e| CoreError::data_access(Phase::Commit, e))?;
    info!("dry run: changes rolled back");
  } else {
    tx.commit().map_err(|e| CoreError::data_access(Phase::Commit, e))?;
    info!(versions = summary.versions_written(), "changes committed");
  }

  Ok(summary)
}

/// Refuse to touch a history table that holds foreign-format rows or already
/// has a key with several current versions.
fn preflight(conn: &rusqlite::Connection, layout: &Layout) -> Result<(), CoreError> {
  ensure_native_rows(conn, &layout.foreign_rows, &layout.history)?;

  let duplicate: Option<(SqlValue, i64)> = conn
    .query_row(&layout.preflight, [], |r| Ok((r.get(0)?, r.get(1)?)))
    .optional()
    .map_err(|e| CoreError::data_access(Phase::Preflight, e))?;

  match duplicate {
    None => Ok(()),
    Some((key, n)) => Err(CoreError::InvariantViolation {
      phase:      Phase::Preflight,
      key_column: layout.plan.key_column().to_owned(),
      key:        decode_value(key).to_string(),
      count:      count(n),
    }),
  }
}

fn extract(conn: &rusqlite::Connection, layout: &Layout) -> Result<Vec<Record>, CoreError> {
  let schema = layout.plan.source_schema().clone();
  let width = schema.len();

  let raws = (|| {
    let mut stmt = conn.prepare(&layout.select_source)?;
    stmt
      .query_map([], |row| {
        (0..width)
          .map(|i| row.get::<_, SqlValue>(i))
          .collect::<rusqlite::Result<Vec<_>>>()
      })?
      .collect::<rusqlite::Result<Vec<_>>>()
  })()
  .map_err(|e| CoreError::data_access(Phase::Extract, e))?;

  raws
    .into_iter()
    .map(|values| Record::new(schema.clone(), values.into_iter().map(decode_value).collect()))
    .collect()
}
