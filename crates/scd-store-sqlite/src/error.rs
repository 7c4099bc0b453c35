//! Error type for `scd-store-sqlite`.

use scd_core::Phase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A run failed; the core error names the phase and the offending key.
  #[error(transparent)]
  Run(#[from] scd_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

impl Error {
  /// The run phase this error belongs to, if it came out of a run.
  pub fn phase(&self) -> Option<Phase> {
    match self {
      Self::Run(e) => Some(e.phase()),
      Self::Database(_) | Self::DateParse(_) => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
