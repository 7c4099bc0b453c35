//! Layered settings: config file, then `SCD_*` environment variables, then
//! command-line overrides.

use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use scd_core::{
  Error as CoreError,
  config::{RawRunConfig, RunConfig},
};
use scd_store_sqlite::{AuditColumns, TableSpec};
use serde::Deserialize;

/// Shape of the settings document (`config.json` by default).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(flatten)]
  pub run:           RawRunConfig,
  #[serde(default = "default_database")]
  pub database:      PathBuf,
  pub source_table:  Option<String>,
  /// Defaults to `<source_table>_cdc`.
  pub history_table: Option<String>,
  #[serde(default)]
  pub audit_columns: AuditColumns,
}

fn default_database() -> PathBuf { PathBuf::from("./data/scd.db") }

/// Values given on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub database:      Option<PathBuf>,
  pub source_table:  Option<String>,
  pub history_table: Option<String>,
}

impl Settings {
  /// Read settings from `path` (optional), the environment, and `overrides`.
  pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, config::ConfigError> {
    let builder = Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(Environment::with_prefix("SCD"));
    Self::build(builder, overrides)
  }

  fn build(
    builder: ConfigBuilder<DefaultState>,
    overrides: &Overrides,
  ) -> Result<Self, config::ConfigError> {
    builder
      .set_override_option(
        "database",
        overrides
          .database
          .as_ref()
          .map(|p| p.to_string_lossy().into_owned()),
      )?
      .set_override_option("source_table", overrides.source_table.clone())?
      .set_override_option("history_table", overrides.history_table.clone())?
      .build()?
      .try_deserialize()
  }

  /// The validated run configuration.
  pub fn run_config(&self) -> Result<RunConfig, CoreError> { self.run.clone().validate() }

  /// The business-key column, for commands that only read history.
  pub fn key_column(&self) -> Result<&str, CoreError> {
    self
      .run
      .primary_key
      .as_deref()
      .ok_or_else(|| CoreError::Configuration("'primary_key' is required".into()))
  }

  pub fn tables(&self) -> Result<TableSpec, CoreError> {
    let source = self
      .source_table
      .as_deref()
      .ok_or_else(|| CoreError::Configuration("'source_table' is required".into()))?;
    let mut spec = TableSpec::new(source).with_audit(self.audit_columns.clone());
    if let Some(history) = &self.history_table {
      spec = spec.with_history(history);
    }
    Ok(spec)
  }
}
