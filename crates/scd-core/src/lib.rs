//! Core types and the change-detection engine for SCD Type 2 history tables.
//!
//! This crate is deliberately free of database dependencies. Storage backends
//! (e.g. `scd-store-sqlite`) implement [`store::HistoryTable`] and drive
//! [`engine::reconcile`] inside their own transaction.

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod record;
pub mod report;
pub mod store;
pub mod value;
pub mod version;

pub use error::{Error, Phase, Result};
