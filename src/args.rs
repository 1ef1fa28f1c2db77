use crate::config::{ConvertMode, CopyConfig};
use crate::dialect::Dialect;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy every table's rows into the destination and print a JSON report
    Convert(CopyArgs),
    /// Show what convert would do, without writing anything
    Plan(CopyArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CopyArgs {
    /// Source PostgreSQL connection URI
    #[arg(short, long)]
    pub source_uri: String,

    /// Destination PostgreSQL connection URI
    #[arg(short, long)]
    pub destination_uri: String,

    /// Only copy tables from this catalog
    #[arg(long)]
    pub catalog: Option<String>,

    /// Only copy tables from this schema
    #[arg(long)]
    pub schema: Option<String>,

    /// Schema the destination tables live in
    #[arg(long)]
    pub destination_schema: Option<String>,

    /// Rows per page and per commit
    #[arg(short, long, default_value_t = 1000)]
    pub batch_size: u64,

    /// Parallel workers for tables larger than one batch
    #[arg(short, long, default_value_t = 10)]
    pub workers: usize,

    /// Commit every insert instead of every batch
    #[arg(long, default_value = "false")]
    pub auto_commit: bool,

    /// What to do when a destination table already holds rows
    #[arg(long, value_enum, default_value_t = ConvertMode::CopyIfEmpty)]
    pub mode: ConvertMode,

    /// Page query with $COLUMNS, $TABLE, $PRIMARY_KEY, $BATCH_SIZE and $OFFSET
    #[arg(long)]
    pub select_template: Option<String>,

    #[arg(long, value_enum, default_value_t = Dialect::Postgres)]
    pub source_dialect: Dialect,

    #[arg(long, value_enum, default_value_t = Dialect::Postgres)]
    pub destination_dialect: Dialect,

    /// Seconds to wait for one table's parallel workers
    #[arg(long, default_value_t = 6 * 60 * 60)]
    pub worker_timeout: u64,
}

impl CopyArgs {
    pub fn config(&self) -> CopyConfig {
        CopyConfig {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            destination_schema: self.destination_schema.clone(),
            batch_size: self.batch_size,
            workers: self.workers,
            auto_commit: self.auto_commit,
            mode: self.mode,
            select_template: self.select_template.clone(),
            source_dialect: self.source_dialect,
            destination_dialect: self.destination_dialect,
            worker_timeout: Duration::from_secs(self.worker_timeout),
        }
    }
}

pub fn get_args() -> Result<Args, clap::Error> {
    Args::try_parse()
}
