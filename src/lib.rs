//! Main library entry point for table-copy.

pub mod args;
pub mod backfill;
pub mod config;
pub mod connection;
pub mod converter;
pub mod dialect;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod postgres;
pub mod query;
pub mod report;
pub mod table;
pub mod value;

// Re-export key types for ergonomic access

pub use self::table::*;
pub use backfill::*;
pub use config::*;
pub use connection::*;
pub use converter::DataConverter;
pub use dialect::Dialect;
pub use error::{CopyError, Result};
pub use orchestrator::*;
pub use policy::*;
pub use report::*;
pub use value::*;
