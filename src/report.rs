//! Serializable summaries of a conversion run and of a dry-run plan.

use crate::policy::Decision;
use serde::Serialize;
use std::ops::Range;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Sequential,
    Parallel,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TableOutcome {
    Copied {
        rows: u64,
        /// Source row count taken before copying.
        expected: u64,
        /// Rows deleted from the destination first.
        cleared: u64,
        route: Route,
    },
    Skipped {
        existing: u64,
    },
    NoPrimaryKey,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub destination: String,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub tables: Vec<TableReport>,
}

impl ConversionReport {
    pub fn rows_copied(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                TableOutcome::Copied { rows, .. } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn copied_tables(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Copied { .. }))
            .count()
    }
}

/// What `convert` would do with one table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: String,
    pub destination: String,
    pub destination_rows: u64,
    pub decision: Decision,
    /// Set once the table is known to be copyable.
    pub source_rows: Option<u64>,
    pub primary_key: Vec<String>,
    pub route: Option<Route>,
    pub windows: Vec<Range<u64>>,
}
