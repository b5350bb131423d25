/// Main entry point for the hdvault CLI
use anyhow::Result;
use clap::Parser;
use hdvault::cli::{Cli, CliHandler};
use tracing_subscriber::fmt;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        fmt().with_max_level(tracing::Level::DEBUG).init();
    } else {
        fmt().with_max_level(tracing::Level::INFO).init();
    }

    let handler = CliHandler::new(&cli.data_dir, cli.provider.as_deref())?;
    if let Err(e) = handler.execute(cli.command) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
