//! The `HistoryTable` trait: the engine's view of the history relation.
//!
//! Implementations are scoped to one open transaction. The engine never
//! commits; the backend that hands it a `HistoryTable` decides whether the
//! writes are kept.

use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::{
  record::Record,
  value::Value,
  version::{Audit, CurrentVersion},
};

/// Read/write access to the history relation for the duration of one run.
pub trait HistoryTable {
  type Error: std::error::Error + Send + Sync + 'static;
  /// Backend handle identifying one stored version.
  type VersionId: Eq + Hash;

  /// All versions of `key` flagged as current. More than one means the
  /// history is corrupt; the engine turns that into an invariant violation.
  fn current_versions(
    &mut self,
    key: &Value,
  ) -> Result<Vec<CurrentVersion<Self::VersionId>>, Self::Error>;

  /// Close a current version: set `valid_to` and clear `is_current`.
  fn expire(
    &mut self,
    id: &Self::VersionId,
    valid_to: DateTime<Utc>,
  ) -> Result<(), Self::Error>;

  /// Append a new version built from a source record and return its id.
  fn insert(
    &mut self,
    record: &Record,
    audit: &Audit,
  ) -> Result<Self::VersionId, Self::Error>;
}
