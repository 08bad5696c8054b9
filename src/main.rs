use clap::Parser;
use tracing_subscriber::EnvFilter;

use sandflow::cli::{self, Cli, Commands};
use sandflow::errors::SandflowError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match (cli.quiet, cli.verbose) {
        (true, 0) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .with_writer(std::io::stderr)
            .init();
    }
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, cli.quiet).await,
        Commands::Validate(args) => cli::validate::handle_validate(args).await,
        Commands::Hash(args) => cli::hash::handle_hash(args).await,
        Commands::Key(args) => cli::key::handle_key(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let exit_code = match &e {
            SandflowError::Config(_)
            | SandflowError::Registry(_)
            | SandflowError::Yaml(_) => 2,
            SandflowError::SandboxSetup(_) => 3,
            SandflowError::StepExecution(_) | SandflowError::StepTimeout { .. } => 4,
            _ => 1,
        };
        std::process::exit(exit_code);
    }
}
