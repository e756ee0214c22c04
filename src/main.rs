use std::process::ExitCode;

use clap::Parser;
use wallet_ledger::cli::{self, Cli};
use wallet_ledger::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging(&cli.log_level, cli.log_format) {
        eprintln!("Failed to initialize logging: {err:#}");
    }

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            cli::exit_code(&err)
        }
    }
}
