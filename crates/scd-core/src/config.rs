//! Run configuration: the business key and the monitored attributes.
//!
//! A [`RawRunConfig`] is whatever the configuration document contained.
//! [`RawRunConfig::validate`] turns it into a [`RunConfig`], and
//! [`RunConfig::bind`] resolves that against the source schema to produce a
//! [`Plan`], so every name is checked before the first row is read.

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  fingerprint::Fingerprinter,
  record::{Record, Schema},
  value::Value,
};

/// The configuration document as deserialised, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRunConfig {
  pub primary_key:         Option<String>,
  pub changing_attributes: Option<Vec<String>>,
}

impl RawRunConfig {
  pub fn validate(self) -> Result<RunConfig> {
    let primary_key = self
      .primary_key
      .ok_or_else(|| missing("primary_key"))?;
    let changing_attributes = self
      .changing_attributes
      .ok_or_else(|| missing("changing_attributes"))?;
    RunConfig::new(primary_key, changing_attributes)
  }
}

fn missing(field: &str) -> Error {
  Error::Configuration(format!("'{field}' is required in the run configuration"))
}

/// A validated run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
  primary_key:         String,
  changing_attributes: Vec<String>,
}

impl RunConfig {
  pub fn new(
    primary_key: impl Into<String>,
    changing_attributes: Vec<String>,
  ) -> Result<Self> {
    let primary_key = primary_key.into();
    if primary_key.trim().is_empty() {
      return Err(Error::Configuration("'primary_key' must not be blank".into()));
    }
    if changing_attributes.is_empty() {
      return Err(Error::Configuration(
        "'changing_attributes' must list at least one attribute".into(),
      ));
    }

    let mut seen = HashSet::new();
    for attr in &changing_attributes {
      if attr.trim().is_empty() {
        return Err(Error::Configuration(
          "'changing_attributes' contains a blank name".into(),
        ));
      }
      if !seen.insert(attr.as_str()) {
        return Err(Error::Configuration(format!(
          "'changing_attributes' lists {attr:?} more than once"
        )));
      }
    }

    Ok(Self { primary_key, changing_attributes })
  }

  pub fn primary_key(&self) -> &str { &self.primary_key }

  pub fn changing_attributes(&self) -> &[String] { &self.changing_attributes }

  /// Resolve every configured name against the source schema.
  pub fn bind(&self, source: Arc<Schema>) -> Result<Plan> {
    let key_index = source.index_of(&self.primary_key).ok_or_else(|| {
      Error::Configuration(format!(
        "primary key {:?} is not a column of the source relation",
        self.primary_key
      ))
    })?;
    let fingerprinter = Fingerprinter::new(&source, &self.changing_attributes)?;
    Ok(Plan { config: self.clone(), source, key_index, fingerprinter })
  }
}

/// A run configuration bound to a concrete source schema.
#[derive(Debug, Clone)]
pub struct Plan {
  config:        RunConfig,
  source:        Arc<Schema>,
  key_index:     usize,
  fingerprinter: Fingerprinter,
}

impl Plan {
  pub fn config(&self) -> &RunConfig { &self.config }

  pub fn source_schema(&self) -> &Arc<Schema> { &self.source }

  pub fn key_column(&self) -> &str { &self.config.primary_key }

  pub fn fingerprinter(&self) -> &Fingerprinter { &self.fingerprinter }

  /// The business key of `record`, or `None` when the column is absent.
  pub fn key_of<'r>(&self, record: &'r Record) -> Option<&'r Value> {
    record.value_at(self.key_index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(json: serde_json::Value) -> RawRunConfig {
    serde_json::from_value(json).unwrap()
  }

  #[test]
  fn complete_document_validates() {
    let cfg = raw(serde_json::json!({
      "primary_key": "id",
      "changing_attributes": ["name", "price"],
    }))
    .validate()
    .unwrap();
    assert_eq!(cfg.primary_key(), "id");
    assert_eq!(cfg.changing_attributes(), ["name", "price"]);
  }

  #[test]
  fn missing_changing_attributes_is_configuration_error() {
    let err = raw(serde_json::json!({ "primary_key": "id" }))
      .validate()
      .unwrap_err();
    assert!(matches!(err, Error::Configuration(ref m) if m.contains("changing_attributes")));
    assert_eq!(err.phase(), crate::Phase::Configuration);
  }

  #[test]
  fn missing_primary_key_is_configuration_error() {
    let err = raw(serde_json::json!({ "changing_attributes": ["name"] }))
      .validate()
      .unwrap_err();
    assert!(matches!(err, Error::Configuration(ref m) if m.contains("primary_key")));
  }

  #[test]
  fn empty_or_duplicate_attributes_are_rejected() {
    assert!(RunConfig::new("id", vec![]).is_err());
    assert!(RunConfig::new("id", vec!["name".into(), "name".into()]).is_err());
    assert!(RunConfig::new("id", vec![" ".into()]).is_err());
    assert!(RunConfig::new("", vec!["name".into()]).is_err());
  }

  #[test]
  fn bind_checks_names_against_schema() {
    let schema = Arc::new(Schema::new(["id", "name", "price"]));
    let cfg = RunConfig::new("id", vec!["name".into(), "price".into()]).unwrap();
    let plan = cfg.bind(schema.clone()).unwrap();
    assert_eq!(plan.key_column(), "id");

    let bad_key = RunConfig::new("sku", vec!["name".into()]).unwrap();
    assert!(matches!(bad_key.bind(schema.clone()), Err(Error::Configuration(_))));

    let bad_attr = RunConfig::new("id", vec!["colour".into()]).unwrap();
    assert!(matches!(bad_attr.bind(schema), Err(Error::Configuration(_))));
  }
}
