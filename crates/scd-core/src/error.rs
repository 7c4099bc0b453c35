//! Error types for `scd-core`.

use std::fmt;

use thiserror::Error;

/// The stage of a run in which an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Validating the run configuration and binding it to the table schemas.
  Configuration,
  /// Checks against the history relation before any row is touched.
  Preflight,
  /// Reading the source snapshot.
  Extract,
  /// Per-row lookup, classification, and mutation.
  Reconcile,
  /// Committing (or rolling back) the run transaction.
  Commit,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Configuration => "configuration",
      Self::Preflight => "preflight",
      Self::Extract => "extract",
      Self::Reconcile => "reconcile",
      Self::Commit => "commit",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(String),

  /// More than one history row claims to be current for a single key.
  #[error(
    "invariant violation: {count} current versions for {key_column} = {key}"
  )]
  InvariantViolation {
    phase:      Phase,
    key_column: String,
    key:        String,
    count:      usize,
  },

  #[error("input validation error: {0}")]
  InputValidation(String),

  #[error("data access error during {phase}: {source}")]
  DataAccess {
    phase:  Phase,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl Error {
  pub fn data_access(
    phase: Phase,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::DataAccess { phase, source: Box::new(source) }
  }

  /// The phase of the run this error belongs to.
  pub fn phase(&self) -> Phase {
    match self {
      Self::Configuration(_) => Phase::Configuration,
      Self::InputValidation(_) => Phase::Reconcile,
      Self::InvariantViolation { phase, .. } | Self::DataAccess { phase, .. } => {
        *phase
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
