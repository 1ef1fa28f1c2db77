//! Immutable settings for one conversion run.

use crate::dialect::Dialect;
use crate::error::{CopyError, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::time::Duration;

/// What to do with a destination table that already holds rows.
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConvertMode {
    /// Copy into empty tables, leave non-empty ones alone.
    #[default]
    CopyIfEmpty,
    /// Delete existing rows, then copy.
    DropAndRecreate,
    /// Leave non-empty tables alone and say so.
    SkipExisting,
    /// Stop the run at the first non-empty table.
    ThrowExceptionIfExists,
}

#[derive(Debug, Clone)]
pub struct CopyConfig {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// Schema destination tables live in; unqualified when `None`.
    pub destination_schema: Option<String>,
    /// Rows per page and per commit. Tables with more rows are copied in parallel.
    pub batch_size: u64,
    /// Parallel units per large table.
    pub workers: usize,
    pub auto_commit: bool,
    pub mode: ConvertMode,
    pub select_template: Option<String>,
    pub source_dialect: Dialect,
    pub destination_dialect: Dialect,
    /// Upper bound on one table's parallel copy.
    pub worker_timeout: Duration,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            catalog: None,
            schema: None,
            destination_schema: None,
            batch_size: 1000,
            workers: 10,
            auto_commit: false,
            mode: ConvertMode::default(),
            select_template: None,
            source_dialect: Dialect::default(),
            destination_dialect: Dialect::default(),
            worker_timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CopyError::Config("batch size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(CopyError::Config(
                "number of workers must be at least 1".into(),
            ));
        }
        if self.worker_timeout.is_zero() {
            return Err(CopyError::Config("worker timeout must be positive".into()));
        }
        Ok(())
    }
}
