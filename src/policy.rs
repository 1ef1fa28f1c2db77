use crate::config::ConvertMode;
use serde::Serialize;

/// What the table driver does with one table.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Copy,
    ClearThenCopy,
    Skip,
    Abort,
}

/// Decides from the destination's current row count and the configured mode.
pub fn decide(destination_rows: u64, mode: ConvertMode) -> Decision {
    if destination_rows == 0 {
        return Decision::Copy;
    }
    match mode {
        ConvertMode::DropAndRecreate => Decision::ClearThenCopy,
        ConvertMode::SkipExisting | ConvertMode::CopyIfEmpty => Decision::Skip,
        ConvertMode::ThrowExceptionIfExists => Decision::Abort,
    }
}
