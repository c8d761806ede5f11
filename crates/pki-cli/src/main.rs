//! pki-admin binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pki_cli::cli::{Cli, Commands};
use pki_cli::commands::{CertFixCommand, ProfileCommand};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v/--debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), pki_cli::CliError> {
    let format = cli.format;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::CertFix(args) => {
            let cmd = CertFixCommand::new(&args);
            cmd.execute(&mut stdout, format)?;
        }
        Commands::Profile { command } => {
            let cmd = ProfileCommand::new();
            cmd.execute(&mut stdout, format, &command)?;
        }
    }

    Ok(())
}
