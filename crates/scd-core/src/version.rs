//! Temporal versions: the audit attributes every history row carries.
//!
//! A version is current from `valid_from` (inclusive) to `valid_to`
//! (exclusive). While it is still current, `valid_to` holds [`far_future`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{fingerprint::Digest, record::Record};

/// Text form of the far-future sentinel, as stored in `valid_to`.
pub const FAR_FUTURE: &str = "9999-12-31T23:59:59.999999Z";

/// The `valid_to` of every current version.
pub fn far_future() -> DateTime<Utc> {
  NaiveDate::from_ymd_opt(9999, 12, 31)
    .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
    .map(|dt| dt.and_utc())
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The four audit attributes appended to every history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Audit {
  pub digest:     Digest,
  pub valid_from: DateTime<Utc>,
  pub valid_to:   DateTime<Utc>,
  pub is_current: bool,
}

impl Audit {
  /// Audit values for a version that becomes current at `run_at`.
  pub fn opened(digest: Digest, run_at: DateTime<Utc>) -> Self {
    Self { digest, valid_from: run_at, valid_to: far_future(), is_current: true }
  }

  /// Whether this version was the current one at instant `at`.
  pub fn active_at(&self, at: DateTime<Utc>) -> bool {
    self.valid_from <= at && at < self.valid_to
  }
}

/// A complete history row: the source attributes plus audit columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
  pub record: Record,
  #[serde(flatten)]
  pub audit:  Audit,
}

/// The lookup result for a key's current version.
///
/// `id` is backend-specific (a row id for SQL stores) and is handed back to
/// [`crate::store::HistoryTable::expire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentVersion<Id> {
  pub id:     Id,
  pub digest: Digest,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn far_future_matches_its_literal() {
    assert_eq!(
      far_future().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
      FAR_FUTURE
    );
  }

  #[test]
  fn opened_version_is_active_from_run_onwards() {
    let run_at = Utc.with_ymd_and_hms(2026, 1, 19, 8, 0, 0).unwrap();
    let audit = Audit::opened(Digest::from_stored("abc"), run_at);
    assert!(audit.is_current);
    assert!(audit.active_at(run_at));
    assert!(!audit.active_at(run_at - chrono::Duration::seconds(1)));
    assert!(audit.active_at(Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap()));
  }

  #[test]
  fn closed_interval_excludes_its_end() {
    let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let audit = Audit {
      digest:     Digest::from_stored("abc"),
      valid_from: from,
      valid_to:   to,
      is_current: false,
    };
    assert!(audit.active_at(from));
    assert!(!audit.active_at(to));
  }
}
