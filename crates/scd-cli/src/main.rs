//! `scd`: SCD Type 2 change-data-capture over a SQLite database.
//!
//! Reads `config.json` (or the path given with `--config`), reconciles the
//! source table into its history table, and prints a run summary.
//!
//! # Usage
//!
//! ```text
//! scd                              # same as `scd run`
//! scd run --dry-run
//! scd history 42 --json
//! scd check
//! ```
//!
//! The database and both tables must already exist.

mod settings;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use scd_core::value::Value;
use scd_store_sqlite::{RunOptions, SqliteStore};
use settings::{Overrides, Settings};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "SCD Type 2 change-data-capture")]
struct Cli {
  /// Path to the settings file (JSON or TOML).
  #[arg(short, long, default_value = "config.json")]
  config: PathBuf,

  /// SQLite database holding the source and history tables.
  #[arg(long)]
  database: Option<PathBuf>,

  #[arg(long)]
  source_table: Option<String>,

  /// Defaults to `<source_table>_cdc`.
  #[arg(long)]
  history_table: Option<String>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Reconcile the source snapshot into history (the default).
  Run {
    /// Classify and write, then roll back instead of committing.
    #[arg(long)]
    dry_run: bool,
    /// Print the report as JSON.
    #[arg(long)]
    json:    bool,
  },
  /// Print every version of one business key, oldest first.
  History {
    key:  String,
    #[arg(long)]
    json: bool,
  },
  /// Verify that every key has exactly one current version.
  Check {
    #[arg(long)]
    json: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let overrides = Overrides {
    database:      cli.database,
    source_table:  cli.source_table,
    history_table: cli.history_table,
  };
  let settings = Settings::load(&cli.config, &overrides)
    .with_context(|| format!("failed to read settings from {:?}", cli.config))?;
  let tables = settings.tables().context("invalid table settings")?;

  match cli.command.unwrap_or(Command::Run { dry_run: false, json: false }) {
    Command::Run { dry_run, json } => {
      // Validated before the database is touched.
      let config = settings.run_config().context("invalid run configuration")?;
      let store = open_store(&settings.database).await?;

      let report = store
        .run(&config, &tables, RunOptions { run_at: None, dry_run })
        .await
        .context("SCD run failed; no changes were persisted")?;

      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        println!("{report}");
      }
    }

    Command::History { key, json } => {
      let key_column = settings.key_column().context("invalid run configuration")?;
      let store = open_store(&settings.database).await?;
      let versions = store
        .history(&tables, key_column, &Value::parse_key(&key))
        .await
        .with_context(|| format!("failed to read history for {key_column} = {key}"))?;

      if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
      } else if versions.is_empty() {
        println!("no history for {key_column} = {key}");
      } else {
        for v in &versions {
          let data = v
            .record
            .iter()
            .map(|(column, value)| format!("{column}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
          println!(
            "{} .. {}  {}  {}  {data}",
            v.audit.valid_from.to_rfc3339(),
            v.audit.valid_to.to_rfc3339(),
            if v.audit.is_current { "current " } else { "expired " },
            short_digest(v.audit.digest.as_str()),
          );
        }
      }
    }

    Command::Check { json } => {
      let key_column = settings.key_column().context("invalid run configuration")?;
      let store = open_store(&settings.database).await?;
      let report = store
        .check_integrity(&tables, key_column)
        .await
        .context("integrity check failed to run")?;

      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        println!("{report}");
      }
      anyhow::ensure!(
        report.is_sound(),
        "history table {:?} violates the one-current-version invariant",
        tables.history
      );
    }
  }

  Ok(())
}

/// First 12 characters of a digest, for the one-line history listing.
fn short_digest(digest: &str) -> String { digest.chars().take(12).collect() }

/// Open an existing database; never create one, since provisioning happens
/// elsewhere.
async fn open_store(path: &Path) -> anyhow::Result<SqliteStore> {
  anyhow::ensure!(
    path.exists(),
    "database {path:?} does not exist; provision it before running"
  );
  SqliteStore::open(path)
    .await
    .with_context(|| format!("failed to open database at {path:?}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_digest_truncates_on_char_boundaries() {
    assert_eq!(short_digest("0123456789abcdef"), "0123456789ab");
    assert_eq!(short_digest("abc"), "abc");
    assert_eq!(short_digest("ééééééééééééé"), "éééééééééééé");
  }
}
