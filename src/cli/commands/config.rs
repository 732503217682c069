use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a config file with default values")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show,
    #[command(about = "Show configuration file path")]
    Path,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    config_path: Option<&Path>,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let path = resolve_path(config_path)?;

    match cmd {
        ConfigCommand::Init { force } => handle_init(&path, force, formatter.as_ref()),
        ConfigCommand::Show => handle_show(&path, format),
        ConfigCommand::Path => {
            let exists = if path.exists() { "" } else { " (not created)" };
            println!(
                "{}",
                formatter.format_message(&format!("{}{}", path.display(), exists))
            );
            Ok(())
        }
    }
}

fn resolve_path(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory")),
    }
}

fn handle_init(path: &Path, force: bool, formatter: &dyn Formatter) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save_to(path)
        .context("failed to write config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

fn handle_show(path: &Path, format: OutputFormat) -> Result<()> {
    let config = if path.exists() {
        Config::load_from(path)?
    } else {
        Config::load()?
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if path.exists() {
        println!("# Config: {}", path.display());
    } else {
        println!("# Defaults (no config file at {})", path.display());
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        handle_config(
            ConfigCommand::Init { force: false },
            Some(path.as_path()),
            OutputFormat::Json,
            false,
        )
        .await
        .unwrap();
        assert!(path.exists());

        let again = handle_config(
            ConfigCommand::Init { force: false },
            Some(path.as_path()),
            OutputFormat::Json,
            false,
        )
        .await;
        assert!(again.is_err());

        handle_config(
            ConfigCommand::Init { force: true },
            Some(path.as_path()),
            OutputFormat::Json,
            false,
        )
        .await
        .unwrap();
    }
}
