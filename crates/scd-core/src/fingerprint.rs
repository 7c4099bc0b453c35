//! Fingerprints over the monitored attributes of a record.
//!
//! The canonical text of each monitored value is joined, in configuration
//! order, with [`DELIMITER`] and hashed with SHA-256. The result is stored as
//! 64 lowercase hex characters in the history relation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{
  Error, Result,
  record::{Record, Schema},
};

/// Separator placed between monitored values before hashing (ASCII unit
/// separator).
pub const DELIMITER: char = '\u{1f}';

/// Length of a digest in hex characters.
pub const DIGEST_LEN: usize = 64;

/// Hex fingerprint of a record's monitored attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
  /// Wrap a digest read back from storage.
  pub fn from_stored(s: impl Into<String>) -> Self { Self(s.into()) }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

fn hash_parts<'a>(parts: impl Iterator<Item = std::borrow::Cow<'a, str>>) -> Digest {
  let mut hasher = Sha256::new();
  for (i, part) in parts.enumerate() {
    if i > 0 {
      let mut buf = [0u8; 4];
      hasher.update(DELIMITER.encode_utf8(&mut buf).as_bytes());
    }
    hasher.update(part.as_bytes());
  }
  Digest(hex::encode(hasher.finalize()))
}

/// Fingerprint `record` over the `monitored` attribute names, in the given
/// order.
///
/// A monitored name missing from the record is a configuration error.
pub fn fingerprint<S: AsRef<str>>(record: &Record, monitored: &[S]) -> Result<Digest> {
  let values = monitored
    .iter()
    .map(|name| {
      record.get(name.as_ref()).ok_or_else(|| {
        Error::Configuration(format!(
          "monitored attribute {:?} is not present in the record",
          name.as_ref()
        ))
      })
    })
    .collect::<Result<Vec<_>>>()?;
  Ok(hash_parts(values.into_iter().map(|v| v.canonical())))
}

/// A fingerprint function with the monitored names already resolved to
/// column positions of one schema.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
  indices: Vec<usize>,
}

impl Fingerprinter {
  pub fn new<S: AsRef<str>>(schema: &Schema, monitored: &[S]) -> Result<Self> {
    let indices = monitored
      .iter()
      .map(|name| {
        schema.index_of(name.as_ref()).ok_or_else(|| {
          Error::Configuration(format!(
            "monitored attribute {:?} is not a column of the source relation",
            name.as_ref()
          ))
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(Self { indices })
  }

  /// Fingerprint a record that was read against the schema this
  /// fingerprinter was built for.
  pub fn digest(&self, record: &Record) -> Result<Digest> {
    let values = self
      .indices
      .iter()
      .map(|&i| {
        record.value_at(i).ok_or_else(|| {
          Error::Configuration(format!(
            "record has no column at position {i}; schema mismatch"
          ))
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(hash_parts(values.into_iter().map(|v| v.canonical())))
  }
}
