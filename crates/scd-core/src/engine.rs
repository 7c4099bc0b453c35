//! The reconciliation engine.
//!
//! For every source row: look up the current version by business key,
//! classify, and issue the matching writes through a [`HistoryTable`]. The
//! engine is synchronous and single-pass; the caller owns the transaction and
//! decides whether to commit what the engine wrote.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, trace};

use crate::{
  Error, Phase, Result,
  classify::{Outcome, classify},
  config::Plan,
  record::Record,
  report::RunSummary,
  store::HistoryTable,
  value::{Value, ValueKind},
  version::Audit,
};

/// Keys and versions already handled by the current run.
struct Seen<Id> {
  keys:     HashSet<(ValueKind, String)>,
  /// Versions inserted by this run. A lookup that lands on one of them means
  /// the backend matched two source keys that compare unequal here (for
  /// example `1` and `'1'` under a numeric column affinity).
  versions: HashSet<Id>,
}

/// Reconcile `rows` against `history` and return the per-outcome counts.
///
/// Every row is stamped with the same `run_at`. The first error stops the run;
/// writes already issued are left for the caller to roll back.
pub fn reconcile<H, I>(
  plan: &Plan,
  rows: I,
  history: &mut H,
  run_at: DateTime<Utc>,
) -> Result<RunSummary>
where
  H: HistoryTable,
  I: IntoIterator<Item = Record>,
{
  let mut summary = RunSummary::default();
  let mut seen = Seen { keys: HashSet::new(), versions: HashSet::new() };

  for (ordinal, row) in rows.into_iter().enumerate() {
    let key = plan.key_of(&row).ok_or_else(|| {
      Error::Configuration(format!(
        "source row {ordinal} has no {:?} column",
        plan.key_column()
      ))
    })?;

    match reconcile_row(plan, &row, key, &mut seen, history, run_at) {
      Ok(outcome) => summary.record(outcome),
      Err(e) => {
        error!(
          row = ordinal,
          key_column = plan.key_column(),
          key = %key,
          error = %e,
          "row failed"
        );
        return Err(e);
      }
    }
  }

  Ok(summary)
}

fn duplicate_key(plan: &Plan, key: &Value) -> Error {
  Error::InputValidation(format!(
    "duplicate {} = {key} in the source snapshot",
    plan.key_column()
  ))
}

fn reconcile_row<H: HistoryTable>(
  plan: &Plan,
  row: &Record,
  key: &Value,
  seen: &mut Seen<H::VersionId>,
  history: &mut H,
  run_at: DateTime<Utc>,
) -> Result<Outcome> {
  if key.is_null() {
    return Err(Error::InputValidation(format!(
      "source row has a null {:?}",
      plan.key_column()
    )));
  }
  if !seen.keys.insert(key.identity()) {
    return Err(duplicate_key(plan, key));
  }

  let digest = plan.fingerprinter().digest(row)?;

  let mut current = history
    .current_versions(key)
    .map_err(|e| Error::data_access(Phase::Reconcile, e))?;
  if current.len() > 1 {
    return Err(Error::InvariantViolation {
      phase:      Phase::Reconcile,
      key_column: plan.key_column().to_owned(),
      key:        key.to_string(),
      count:      current.len(),
    });
  }
  let current = current.pop();
  if current.as_ref().is_some_and(|c| seen.versions.contains(&c.id)) {
    return Err(duplicate_key(plan, key));
  }

  let outcome = classify(current.as_ref().map(|c| &c.digest), &digest);
  match outcome {
    Outcome::New => {
      let id = history
        .insert(row, &Audit::opened(digest, run_at))
        .map_err(|e| Error::data_access(Phase::Reconcile, e))?;
      seen.versions.insert(id);
      debug!(key = %key, "new");
    }
    Outcome::Changed => {
      if let Some(previous) = &current {
        history
          .expire(&previous.id, run_at)
          .map_err(|e| Error::data_access(Phase::Reconcile, e))?;
      }
      let id = history
        .insert(row, &Audit::opened(digest, run_at))
        .map_err(|e| Error::data_access(Phase::Reconcile, e))?;
      seen.versions.insert(id);
      debug!(key = %key, "changed");
    }
    Outcome::Unchanged => trace!(key = %key, "unchanged"),
  }

  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::TimeZone;

  use super::*;
  use crate::{
    config::RunConfig,
    fingerprint::Digest,
    record::Schema,
    version::{CurrentVersion, far_future},
  };

  // ─── In-memory history ────────────────────────────────────────────────────

  #[derive(Debug)]
  struct Row {
    key:   (ValueKind, String),
    audit: Audit,
    data:  Record,
  }

  #[derive(Debug, thiserror::Error)]
  #[error("injected failure")]
  struct Injected;

  #[derive(Default)]
  struct MemoryHistory {
    rows:        Vec<Row>,
    fail_after:  Option<usize>,
    writes:      usize,
    key_column:  String,
    /// Match keys by canonical text, the way a numeric column affinity
    /// makes SQLite treat `1` and `'1'` as equal.
    loose_keys:  bool,
  }

  impl MemoryHistory {
    fn new(key_column: &str) -> Self {
      Self { key_column: key_column.into(), ..Default::default() }
    }

    fn write(&mut self) -> std::result::Result<(), Injected> {
      if self.fail_after.is_some_and(|n| self.writes >= n) {
        return Err(Injected);
      }
      self.writes += 1;
      Ok(())
    }

    fn current(&self) -> impl Iterator<Item = &Row> {
      self.rows.iter().filter(|r| r.audit.is_current)
    }

    fn same_key(&self, stored: &(ValueKind, String), probe: &(ValueKind, String)) -> bool {
      if self.loose_keys { stored.1 == probe.1 } else { stored == probe }
    }
  }

  impl HistoryTable for MemoryHistory {
    type Error = Injected;
    type VersionId = usize;

    fn current_versions(
      &mut self,
      key: &Value,
    ) -> std::result::Result<Vec<CurrentVersion<usize>>, Injected> {
      let id = key.identity();
      Ok(
        self
          .rows
          .iter()
          .enumerate()
          .filter(|(_, r)| r.audit.is_current && self.same_key(&r.key, &id))
          .map(|(i, r)| CurrentVersion { id: i, digest: r.audit.digest.clone() })
          .collect(),
      )
    }

    fn expire(
      &mut self,
      id: &usize,
      valid_to: DateTime<Utc>,
    ) -> std::result::Result<(), Injected> {
      self.write()?;
      let row = &mut self.rows[*id];
      row.audit.valid_to = valid_to;
      row.audit.is_current = false;
      Ok(())
    }

    fn insert(
      &mut self,
      record: &Record,
      audit: &Audit,
    ) -> std::result::Result<usize, Injected> {
      self.write()?;
      let key = record.get(&self.key_column).cloned().unwrap_or(Value::Null);
      self.rows.push(Row { key: key.identity(), audit: audit.clone(), data: record.clone() });
      Ok(self.rows.len() - 1)
    }
  }

  // ─── Fixtures ─────────────────────────────────────────────────────────────

  fn schema() -> Arc<Schema> { Arc::new(Schema::new(["id", "name", "price"])) }

  fn plan() -> Plan {
    RunConfig::new("id", vec!["name".into(), "price".into()])
      .unwrap()
      .bind(schema())
      .unwrap()
  }

  fn keyed(key: Value, name: &str, price: f64) -> Record {
    Record::new(schema(), vec![key, name.into(), Value::Real(price)]).unwrap()
  }

  fn row(id: i64, name: &str, price: f64) -> Record {
    keyed(Value::Integer(id), name, price)
  }

  fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 19, hour, 0, 0).unwrap()
  }

  // ─── Scenarios ────────────────────────────────────────────────────────────

  #[test]
  fn first_run_inserts_current_version() {
    let mut h = MemoryHistory::new("id");
    let s = reconcile(&plan(), [row(1, "Widget", 9.99)], &mut h, at(8)).unwrap();

    assert_eq!(
      s,
      RunSummary { new_count: 1, changed_count: 0, unchanged_count: 0, total_count: 1 }
    );
    assert_eq!(h.rows.len(), 1);
    let audit = &h.rows[0].audit;
    assert!(audit.is_current);
    assert_eq!(audit.valid_from, at(8));
    assert_eq!(audit.valid_to, far_future());
  }

  #[test]
  fn unchanged_row_writes_nothing() {
    let mut h = MemoryHistory::new("id");
    reconcile(&plan(), [row(1, "Widget", 9.99)], &mut h, at(8)).unwrap();
    let writes = h.writes;

    let s = reconcile(&plan(), [row(1, "Widget", 9.99)], &mut h, at(9)).unwrap();
    assert_eq!(s.unchanged_count, 1);
    assert_eq!(s.total_count, 1);
    assert_eq!(h.writes, writes);
    assert_eq!(h.rows.len(), 1);
  }

  #[test]
  fn changed_row_expires_then_inserts() {
    let mut h = MemoryHistory::new("id");
    reconcile(&plan(), [row(1, "Widget", 9.99)], &mut h, at(8)).unwrap();
    let s = reconcile(&plan(), [row(1, "Widget", 12.99)], &mut h, at(9)).unwrap();

    assert_eq!(s.changed_count, 1);
    assert_eq!(h.rows.len(), 2);

    let old = &h.rows[0];
    assert!(!old.audit.is_current);
    assert_eq!(old.audit.valid_to, at(9));
    assert_eq!(old.data.get("price"), Some(&Value::Real(9.99)));

    let new = &h.rows[1];
    assert!(new.audit.is_current);
    assert_eq!(new.audit.valid_from, at(9));
    assert_ne!(new.audit.digest, old.audit.digest);
    assert_eq!(h.current().count(), 1);
  }

  #[test]
  fn unmonitored_change_is_unchanged() {
    let wide = Arc::new(Schema::new(["id", "name", "price", "note"]));
    let plan = RunConfig::new("id", vec!["name".into(), "price".into()])
      .unwrap()
      .bind(wide.clone())
      .unwrap();
    let mk = |note: &str| {
      let values = vec![Value::Integer(1), "Widget".into(), Value::Real(9.99), note.into()];
      Record::new(wide.clone(), values).unwrap()
    };

    let mut h = MemoryHistory::new("id");
    reconcile(&plan, [mk("blue")], &mut h, at(8)).unwrap();
    let s = reconcile(&plan, [mk("red")], &mut h, at(9)).unwrap();
    assert_eq!(s.unchanged_count, 1);
    assert_eq!(h.rows.len(), 1);
  }

  #[test]
  fn run_timestamp_is_shared_by_every_row() {
    let mut h = MemoryHistory::new("id");
    let rows = (1..=5i64).map(|i| row(i, "Widget", i as f64));
    reconcile(&plan(), rows, &mut h, at(8)).unwrap();
    assert!(h.rows.iter().all(|r| r.audit.valid_from == at(8)));
  }

  #[test]
  fn two_current_versions_is_invariant_violation() {
    let mut h = MemoryHistory::new("id");
    for _ in 0..2 {
      h.rows.push(Row {
        key:   Value::Integer(1).identity(),
        audit: Audit::opened(Digest::from_stored("x"), at(1)),
        data:  row(1, "Widget", 9.99),
      });
    }

    let err = reconcile(&plan(), [row(1, "Widget", 9.99)], &mut h, at(8)).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation { count: 2, .. }));
    assert_eq!(h.writes, 0);
  }

  #[test]
  fn null_key_is_input_validation_error() {
    let mut h = MemoryHistory::new("id");
    let rows = [keyed(Value::Null, "Widget", 1.0)];
    let err = reconcile(&plan(), rows, &mut h, at(8)).unwrap_err();
    assert!(matches!(err, Error::InputValidation(_)));
    assert!(h.rows.is_empty());
  }

  #[test]
  fn duplicate_key_is_input_validation_error() {
    let mut h = MemoryHistory::new("id");
    let rows = [row(1, "Widget", 1.0), row(2, "Gadget", 2.0), row(1, "Widget", 3.0)];
    let err = reconcile(&plan(), rows, &mut h, at(8)).unwrap_err();
    assert!(matches!(err, Error::InputValidation(ref m) if m.contains("duplicate")));
  }

  #[test]
  fn integer_and_text_keys_are_distinct() {
    let mut h = MemoryHistory::new("id");
    let rows = [row(1, "Widget", 1.0), keyed("1".into(), "Widget", 1.0)];
    let s = reconcile(&plan(), rows, &mut h, at(8)).unwrap();
    assert_eq!(s.new_count, 2);
  }

  #[test]
  fn keys_the_backend_treats_as_equal_are_duplicates() {
    let mut h = MemoryHistory::new("id");
    h.loose_keys = true;
    let rows = [row(1, "Widget", 1.0), keyed("1".into(), "Widget", 2.0)];

    let err = reconcile(&plan(), rows, &mut h, at(8)).unwrap_err();
    assert!(matches!(err, Error::InputValidation(ref m) if m.contains("duplicate")));
    assert_eq!(h.rows.len(), 1);
  }

  #[test]
  fn loose_keys_still_match_versions_from_earlier_runs() {
    let mut h = MemoryHistory::new("id");
    h.loose_keys = true;
    reconcile(&plan(), [row(1, "Widget", 1.0)], &mut h, at(8)).unwrap();

    let s = reconcile(&plan(), [keyed("1".into(), "Widget", 1.0)], &mut h, at(9)).unwrap();
    assert_eq!(s.unchanged_count, 1);
  }

  #[test]
  fn store_failure_stops_the_run() {
    let mut h = MemoryHistory::new("id");
    h.fail_after = Some(5);
    let rows = (1..=10i64).map(|i| row(i, "Widget", i as f64));

    let err = reconcile(&plan(), rows, &mut h, at(8)).unwrap_err();
    assert!(matches!(err, Error::DataAccess { phase: Phase::Reconcile, .. }));
    assert_eq!(h.rows.len(), 5);
  }
}
