//! SQLite backend for SCD Type 2 history tables.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. A run is handed to that thread as a
//! single closure, so the whole reconciliation happens inside one rusqlite
//! transaction.

mod encode;
mod history;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use schema::{AuditColumns, TableSpec};
pub use store::{RunOptions, SqliteStore};
