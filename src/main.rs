//! Main binary entry point for table-copy.

use anyhow::Result;
use std::sync::Arc;
use table_copy::DataConverter;
use table_copy::args::{Command, CopyArgs, get_args};
use table_copy::postgres::PgConnectionFactory;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = get_args()?;
    match args.command {
        Command::Convert(copy) => {
            let converter = converter(&copy)?;
            let report = converter.convert()?;
            info!(
                tables = report.copied_tables(),
                rows = report.rows_copied(),
                "Conversion complete"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Plan(copy) => {
            let converter = converter(&copy)?;
            let plan = converter.plan()?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}

fn converter(copy: &CopyArgs) -> Result<DataConverter> {
    let config = copy.config();
    let factory = PgConnectionFactory::new(&copy.source_uri, &copy.destination_uri, config.workers)?;
    Ok(DataConverter::new(Arc::new(factory), config)?)
}
