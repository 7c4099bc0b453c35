//! Scalar values as they travel between the relations and the engine.
//!
//! The variants mirror the storage classes of a relational store. Every value
//! has a single canonical text form, used both for fingerprinting and for
//! duplicate-key detection.

use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

/// A single attribute value read from (or written to) a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Blob(Vec<u8>),
}

/// The storage class of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
  Null,
  Integer,
  Real,
  Text,
  Blob,
}

/// Canonical text of [`Value::Null`].
pub const NULL_TEXT: &str = "NULL";

impl Value {
  pub fn kind(&self) -> ValueKind {
    match self {
      Self::Null => ValueKind::Null,
      Self::Integer(_) => ValueKind::Integer,
      Self::Real(_) => ValueKind::Real,
      Self::Text(_) => ValueKind::Text,
      Self::Blob(_) => ValueKind::Blob,
    }
  }

  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// The canonical, locale-independent text form of this value.
  ///
  /// Reals use the shortest representation that round-trips, always with a
  /// fractional part or exponent (`12.0`, `9.99`, `1e16`), and negative zero
  /// is folded into `0.0`. Blobs are lowercase hex.
  pub fn canonical(&self) -> Cow<'_, str> {
    match self {
      Self::Null => Cow::Borrowed(NULL_TEXT),
      Self::Integer(i) => Cow::Owned(i.to_string()),
      Self::Real(r) => {
        let r = if *r == 0.0 { 0.0 } else { *r };
        Cow::Owned(format!("{r:?}"))
      }
      Self::Text(s) => Cow::Borrowed(s),
      Self::Blob(b) => Cow::Owned(hex::encode(b)),
    }
  }

  /// A hashable identity: two values share an identity iff they have the same
  /// storage class and the same canonical text.
  pub fn identity(&self) -> (ValueKind, String) {
    (self.kind(), self.canonical().into_owned())
  }

  /// Interpret free text typed by an operator as a key value: integers when
  /// the text parses as one, text otherwise.
  pub fn parse_key(s: &str) -> Self {
    match s.parse::<i64>() {
      Ok(i) => Self::Integer(i),
      Err(_) => Self::Text(s.to_owned()),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self { Self::Integer(i) }
}

impl From<f64> for Value {
  fn from(r: f64) -> Self { Self::Real(r) }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Vec<u8>> for Value {
  fn from(b: Vec<u8>) -> Self { Self::Blob(b) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}
