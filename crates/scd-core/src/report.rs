//! Run summaries. Built from the engine's returned counts once the run
//! transaction has been settled; nothing here feeds back into reconciliation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::classify::Outcome;

/// Per-classification counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub new_count:       usize,
  pub changed_count:   usize,
  pub unchanged_count: usize,
  pub total_count:     usize,
}

impl RunSummary {
  pub fn record(&mut self, outcome: Outcome) {
    match outcome {
      Outcome::New => self.new_count += 1,
      Outcome::Changed => self.changed_count += 1,
      Outcome::Unchanged => self.unchanged_count += 1,
    }
    self.total_count += 1;
  }

  /// Rows inserted into the history relation.
  pub fn versions_written(&self) -> usize { self.new_count + self.changed_count }
}

/// Everything an operator needs to know about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub run_id:        Uuid,
  pub run_at:        DateTime<Utc>,
  pub source_table:  String,
  pub history_table: String,
  /// The writes were rolled back rather than committed.
  pub dry_run:       bool,
  pub elapsed_ms:    u64,
  #[serde(flatten)]
  pub summary:       RunSummary,
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rule = "=".repeat(60);
    let title = if self.dry_run {
      "SCD Type 2 run complete (dry run, rolled back)"
    } else {
      "SCD Type 2 run complete"
    };
    writeln!(f, "{rule}")?;
    writeln!(f, "{title}")?;
    writeln!(f, "{rule}")?;
    writeln!(f, "  Run id:            {}", self.run_id)?;
    writeln!(f, "  Tables:            {} -> {}", self.source_table, self.history_table)?;
    writeln!(f, "  New records:       {}", self.summary.new_count)?;
    writeln!(f, "  Changed records:   {}", self.summary.changed_count)?;
    writeln!(f, "  Unchanged records: {}", self.summary.unchanged_count)?;
    writeln!(f, "  Total processed:   {}", self.summary.total_count)?;
    writeln!(f, "  Run timestamp:     {}", self.run_at.to_rfc3339())?;
    writeln!(f, "  Elapsed:           {} ms", self.elapsed_ms)?;
    write!(f, "{rule}")
  }
}

/// Result of scanning the whole history relation for invariant breaches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
  pub keys:             usize,
  pub versions:         usize,
  pub current_versions: usize,
  /// Keys with history but no current version.
  pub keys_without_current: Vec<String>,
  /// Keys with more than one current version.
  pub keys_with_multiple_current: Vec<String>,
  /// Rows whose `is_current` disagrees with `valid_to` being the sentinel.
  pub inconsistent_flags: usize,
}

impl IntegrityReport {
  pub fn is_sound(&self) -> bool {
    self.keys_without_current.is_empty()
      && self.keys_with_multiple_current.is_empty()
      && self.inconsistent_flags == 0
  }
}

impl fmt::Display for IntegrityReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "keys: {}, versions: {}, current: {}",
      self.keys, self.versions, self.current_versions
    )?;
    if !self.keys_without_current.is_empty() {
      writeln!(f, "keys without a current version: {}", self.keys_without_current.join(", "))?;
    }
    if !self.keys_with_multiple_current.is_empty() {
      writeln!(
        f,
        "keys with several current versions: {}",
        self.keys_with_multiple_current.join(", ")
      )?;
    }
    if self.inconsistent_flags > 0 {
      writeln!(f, "rows with is_current/valid_to mismatch: {}", self.inconsistent_flags)?;
    }
    write!(f, "{}", if self.is_sound() { "OK" } else { "CORRUPT" })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn summary_counts_every_outcome() {
    let mut s = RunSummary::default();
    for o in [Outcome::New, Outcome::Changed, Outcome::Unchanged, Outcome::New] {
      s.record(o);
    }
    assert_eq!(s.new_count, 2);
    assert_eq!(s.changed_count, 1);
    assert_eq!(s.unchanged_count, 1);
    assert_eq!(s.total_count, 4);
    assert_eq!(s.versions_written(), 3);
  }

  fn report(dry_run: bool) -> RunReport {
    RunReport {
      run_id: Uuid::nil(),
      run_at: Utc.with_ymd_and_hms(2026, 1, 19, 8, 30, 0).unwrap(),
      source_table: "sales_records".into(),
      history_table: "sales_records_cdc".into(),
      dry_run,
      elapsed_ms: 12,
      summary: RunSummary { new_count: 1, changed_count: 2, unchanged_count: 3, total_count: 6 },
    }
  }

  #[test]
  fn display_lists_counts() {
    let text = report(false).to_string();
    assert!(text.contains("New records:       1"));
    assert!(text.contains("Changed records:   2"));
    assert!(text.contains("Unchanged records: 3"));
    assert!(text.contains("Total processed:   6"));
    assert!(!text.contains("dry run"));
    assert!(report(true).to_string().contains("dry run"));
  }

  #[test]
  fn json_flattens_summary() {
    let json = serde_json::to_value(report(false)).unwrap();
    assert_eq!(json["new_count"], 1);
    assert_eq!(json["total_count"], 6);
    assert_eq!(json["history_table"], "sales_records_cdc");
  }

  #[test]
  fn integrity_soundness() {
    let mut r = IntegrityReport { keys: 2, versions: 3, current_versions: 2, ..Default::default() };
    assert!(r.is_sound());
    r.keys_with_multiple_current.push("1".into());
    assert!(!r.is_sound());
    assert!(r.to_string().ends_with("CORRUPT"));
  }
}
