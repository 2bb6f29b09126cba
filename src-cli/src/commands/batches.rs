//! Batches command - list batch folders in the configured bucket.

use clap::Args;
use console::style;

use invoicer::storage::{open_store, BatchBrowser};

use super::load_settings;

/// Arguments for the batches command.
#[derive(Args)]
pub struct BatchesArgs {
    /// Bucket to look in instead of the configured one
    #[arg(long)]
    bucket: Option<String>,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: BatchesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_settings(config_path)?;
    if let Some(bucket) = args.bucket {
        config.storage.bucket = bucket;
    }

    let store = open_store(&config.storage)?;
    let browser = BatchBrowser::new(store, &config.storage.root_prefix);
    let batches = browser.list_batches().await?;

    if args.json {
        let prefixes: Vec<_> = batches.iter().map(|b| b.prefix.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&prefixes)?);
        return Ok(());
    }

    if batches.is_empty() {
        println!(
            "{} No batches under '{}' in bucket '{}'",
            style("ℹ").blue(),
            config.storage.root_prefix,
            config.storage.bucket
        );
        return Ok(());
    }

    for batch in &batches {
        println!("{}", batch.name);
    }
    println!();
    println!("{} {} batches", style("✓").green(), batches.len());

    Ok(())
}
