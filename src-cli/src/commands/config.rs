//! Config command - manage configuration.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use invoicer::config::save_config;
use invoicer::{Config, CredentialSource};

use super::{default_config_path, load_settings};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show the effective configuration (file plus environment)
    Show,

    /// Write a configuration file with default values
    Init(InitArgs),

    /// Show configuration file path
    Path,
}

#[derive(Args)]
struct InitArgs {
    /// Output path for configuration file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Overwrite existing file
    #[arg(long)]
    force: bool,
}

pub async fn run(args: ConfigArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(config_path),
        ConfigCommand::Init(init_args) => init_config(init_args),
        ConfigCommand::Path => show_path(config_path),
    }
}

fn mask(source: &mut CredentialSource) {
    if source.value.is_some() {
        source.value = Some("********".to_string());
    }
}

fn show_config(config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_settings(config_path)?;

    if !config.inference.api_key.is_configured() {
        eprintln!(
            "{} inference.api_key names no source; processing will fail",
            style("!").yellow()
        );
    }

    mask(&mut config.inference.api_key);
    mask(&mut config.storage.s3.access_key_id);
    mask(&mut config.storage.s3.secret_access_key);
    mask(&mut config.storage.s3.session_token);

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init_config(args: InitArgs) -> anyhow::Result<()> {
    let output_path = args.output.unwrap_or_else(default_config_path);

    if output_path.exists() && !args.force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            output_path.display()
        );
    }

    save_config(&Config::default(), &output_path)?;

    println!(
        "{} Created configuration file at {}",
        style("✓").green(),
        output_path.display()
    );
    Ok(())
}

fn show_path(config_path: Option<&str>) -> anyhow::Result<()> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let state = if path.exists() {
        style("exists").green()
    } else {
        style("not found").yellow()
    };
    println!("{} ({})", path.display(), state);
    Ok(())
}
