//! Show command - print the summary of a stored batch, or one of its artifacts.

use clap::Args;
use console::{style, StyledObject};

use invoicer::storage::{open_store, ArtifactKind, BatchBrowser};

use super::load_settings;
use super::process::print_summary;

/// Arguments for the show command.
#[derive(Args)]
pub struct ShowArgs {
    /// Batch id (or a unique prefix of it), folder name or full key prefix
    batch: String,

    /// Print the stored result for this input file instead of the summary
    #[arg(short, long)]
    file: Option<String>,

    /// List the stored artifacts
    #[arg(long, conflicts_with = "file")]
    artifacts: bool,

    /// Print download links (valid for one hour) instead of content; S3 only
    #[arg(long)]
    url: bool,

    /// Bucket to look in instead of the configured one
    #[arg(long)]
    bucket: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: ShowArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_settings(config_path)?;
    if let Some(bucket) = args.bucket {
        config.storage.bucket = bucket;
    }

    let store = open_store(&config.storage)?;
    let browser = BatchBrowser::new(store, &config.storage.root_prefix);
    let folder = browser.resolve(&args.batch).await?;

    if args.url {
        return print_urls(&browser, &folder.prefix, args.file.as_deref()).await;
    }

    if let Some(file_name) = &args.file {
        print!("{}", browser.read_for_file(&folder.prefix, file_name).await?);
        return Ok(());
    }

    if args.artifacts {
        for artifact in browser.list_artifacts(&folder.prefix).await? {
            println!("{} {:>8}  {}", label(artifact.kind), artifact.size, artifact.name);
        }
        return Ok(());
    }

    let summary = browser.load_summary(&folder.prefix).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn label(kind: ArtifactKind) -> StyledObject<&'static str> {
    match kind {
        ArtifactKind::Markdown => style("md   ").green(),
        ArtifactKind::Error => style("error").red(),
    }
}

async fn print_urls(
    browser: &BatchBrowser,
    prefix: &str,
    file_name: Option<&str>,
) -> anyhow::Result<()> {
    let keys: Vec<(ArtifactKind, String)> = match file_name {
        Some(name) => {
            let summary = browser.load_summary(prefix).await?;
            let item = summary
                .items
                .iter()
                .find(|item| item.file_name == name)
                .ok_or_else(|| anyhow::anyhow!("No file named '{}' in this batch", name))?;
            let key = item
                .storage_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("No stored result for '{}'", name))?;
            let kind = if item.success {
                ArtifactKind::Markdown
            } else {
                ArtifactKind::Error
            };
            vec![(kind, key)]
        }
        None => browser
            .list_artifacts(prefix)
            .await?
            .into_iter()
            .map(|a| (a.kind, a.key))
            .collect(),
    };

    for (kind, key) in keys {
        match browser.download_url(&key).await? {
            Some(url) => println!("{} {}\n      {}", label(kind), key, url),
            None => anyhow::bail!("The configured storage backend cannot create download links"),
        }
    }
    Ok(())
}
