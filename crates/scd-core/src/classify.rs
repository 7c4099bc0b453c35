//! The three-way classification of a source row against its current version.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Digest;

/// What a run does with one source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
  /// No current version exists: insert one.
  New,
  /// The current version's digest differs: expire it, then insert.
  Changed,
  /// Digests are equal: no write.
  Unchanged,
}

/// Classify a row by comparing its fresh digest with the digest of the
/// current version, if any.
pub fn classify(current: Option<&Digest>, incoming: &Digest) -> Outcome {
  match current {
    None => Outcome::New,
    Some(d) if d == incoming => Outcome::Unchanged,
    Some(_) => Outcome::Changed,
  }
}
