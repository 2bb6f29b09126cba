//! Process command - submit files as one batch.

use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use invoicer::batch::{
    BatchProcessor, BatchSummary, CompositeProgress, FileProgress, InputFile, ProgressEvent,
    ProgressReporter,
};
use invoicer::config::{KeyDisambiguation, StorageBackend};

use super::load_settings;

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Target bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Storage backend (filesystem, s3, memory)
    #[arg(long)]
    backend: Option<StorageBackend>,

    /// Model calls allowed per minute
    #[arg(long)]
    rpm: Option<u32>,

    /// Append a timestamp to artifact keys so equal base names don't collide
    #[arg(long)]
    timestamp_keys: bool,

    /// Mirror progress as JSON into this file
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Print the batch summary as JSON
    #[arg(long)]
    json: bool,
}

/// Drives an indicatif bar from batch progress events.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total, .. } => {
                self.bar.set_length(total as u64);
                self.bar.set_message("starting");
            }
            ProgressEvent::ItemCompleted {
                completed, message, ..
            } => {
                self.bar.set_position(completed as u64);
                self.bar.set_message(message);
            }
            ProgressEvent::Finished { .. } => {
                self.bar.finish_with_message("complete");
            }
        }
    }
}

fn expand_inputs(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let before = files.len();
        for entry in glob(pattern)? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path: {}", e),
            }
        }
        if files.len() == before {
            warn!("No files match '{}'", pattern);
        }
    }
    Ok(files)
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_settings(config_path)?;
    if let Some(bucket) = args.bucket {
        config.storage.bucket = bucket;
    }
    if let Some(backend) = args.backend {
        config.storage.backend = backend;
    }
    if let Some(rpm) = args.rpm {
        if rpm == 0 {
            anyhow::bail!("--rpm must be greater than 0");
        }
        config.rate_limit.max_operations = rpm;
        config.rate_limit.window_secs = 60;
    }
    if args.timestamp_keys {
        config.storage.key_disambiguation = KeyDisambiguation::Timestamp;
    }

    let paths = expand_inputs(&args.inputs)?;
    if paths.is_empty() {
        anyhow::bail!("No matching files found for: {}", args.inputs.join(" "));
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        debug!("Reading {}", path.display());
        files.push(InputFile::from_path(path)?);
    }

    let processor = BatchProcessor::from_config(&config)?;

    if !args.json {
        println!(
            "{} Submitting {} files to bucket '{}'",
            style("ℹ").blue(),
            files.len(),
            config.storage.bucket
        );
    }

    let mut reporter = CompositeProgress::new();
    if !args.json {
        reporter = reporter.with(BarProgress::new());
    }
    if let Some(path) = &args.progress_file {
        reporter = reporter.with(FileProgress::new(path));
    }

    let summary = processor.process_batch(files, &reporter).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
        println!(
            "{} Finished in {:.1}s",
            style("✓").green(),
            start.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

pub fn print_summary(summary: &BatchSummary) {
    println!();
    println!("{} {}", style("Batch").bold(), summary.batch_id);
    println!("  Prefix:    {}", summary.storage_prefix);
    println!("  Created:   {}", summary.created_at.to_rfc3339());
    println!(
        "  Files:     {} submitted, {} processed",
        summary.total_files, summary.total_processed
    );
    println!(
        "  Results:   {} successful, {} failed",
        style(summary.successful).green(),
        style(summary.failed).red()
    );

    if !summary.items.is_empty() {
        println!();
        for item in &summary.items {
            let mark = if item.success {
                style("✓").green()
            } else {
                style("✗").red()
            };
            let detail = match (&item.error, &item.storage_key) {
                (Some(error), _) => error.clone(),
                (None, Some(key)) => key.clone(),
                (None, None) => String::new(),
            };
            println!("  {} {:<32} {}", mark, item.file_name, detail);
            if let Some(storage_error) = &item.storage_error {
                println!("      {} {}", style("not stored:").yellow(), storage_error);
            }
        }
    }

    if !summary.skipped.is_empty() {
        println!();
        println!(
            "  {} {}",
            style("Skipped (not an image):").dim(),
            summary.skipped.join(", ")
        );
    }
}
