use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use batchflow::cli::commands::{ConfigCommand, handle_config, handle_run};
use batchflow::cli::output::get_formatter;
use batchflow::cli::{Cli, Commands};
use batchflow::models::Config;

fn init_logging(verbose: bool) {
    let default = if verbose { "batchflow=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    // `config init` is the one command allowed to name a file that does not
    // exist yet.
    let config = match &cli.command {
        Commands::Config(ConfigCommand::Init { .. }) => Config::load()?,
        _ => Config::resolve(cli.config.as_deref())?,
    };
    let format = cli.format.unwrap_or(config.output.default_format);

    tokio::select! {
        result = run_command(cli.command, cli.config.as_deref(), &config, format, cli.verbose) => {
            if let Err(error) = result {
                eprintln!("{}", get_formatter(format).format_error(&format!("{error:#}")));
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cleaning up...");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

async fn run_command(
    command: Commands,
    config_path: Option<&std::path::Path>,
    config: &Config,
    format: batchflow::models::OutputFormat,
    verbose: bool,
) -> Result<()> {
    match command {
        Commands::Run(args) => {
            handle_run(args, config, format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, config_path, format, verbose).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
