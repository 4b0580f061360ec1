mod checkpoint;
mod config;
mod ids;
mod processor;
mod report;
mod source;
mod store;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::checkpoint::CheckpointLog;
use crate::config::Config;
use crate::processor::Processor;
use crate::source::HttpSource;
use crate::store::RecordStore;

#[derive(Parser, Debug)]
#[command(name = "app_fetcher")]
#[command(about = "Fetch catalog records into a sharded JSON tree with resumable id logs", long_about = None)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output root holding app_details/ and logs/
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every pending id from the input list
    Fetch {
        /// Newline-delimited id list
        #[arg(long)]
        ids: Option<PathBuf>,

        /// Refetch ids the checkpoint would skip
        #[arg(long)]
        force: bool,

        /// Automatic retries per failed id across runs
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Recompute the fetched/succeeded/failed logs from the record files on disk
    Rebuild,
    /// Merge id files into one deduplicated, numerically sorted list
    MergeIds {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long, short = 'o')]
        output: PathBuf,
    },
    /// Print ids present in only one of two files
    DiffIds { a: PathBuf, b: PathBuf },
    /// Print ids that occur more than once in a file
    Dupes { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Command::Fetch {
            ids,
            force,
            max_retries,
        } => {
            if let Some(ids) = ids {
                config.ids_file = ids;
            }
            if let Some(max_retries) = max_retries {
                config.max_retries = max_retries;
            }
            fetch(&config, force).await?;
        }
        Command::Rebuild => {
            config.validate()?;
            let store = RecordStore::new(&config.root, config.shard_width);
            CheckpointLog::new(config.log_paths()).rebuild(&store)?;
        }
        Command::MergeIds { inputs, output } => {
            let inputs: Vec<&std::path::Path> = inputs.iter().map(PathBuf::as_path).collect();
            ids::merge_id_files(&inputs, &output)?;
        }
        Command::DiffIds { a, b } => {
            for id in ids::diff_id_files(&a, &b)? {
                println!("{id}");
            }
        }
        Command::Dupes { file } => {
            for (id, count) in ids::duplicate_ids(&file)? {
                println!("{id}\t{count}");
            }
        }
    }

    Ok(())
}

async fn fetch(config: &Config, force: bool) -> Result<()> {
    config.validate()?;

    let app_ids = ids::read_ids(&config.ids_file)?;
    if app_ids.is_empty() {
        bail!("No ids found in {}", config.ids_file.display());
    }

    info!(
        "Fetcher started: {} ids, root {}",
        app_ids.len(),
        config.root.display()
    );

    let processor = Processor::new(config, HttpSource::from_config(config)).with_force(force);
    let summary = processor.run(&app_ids).await?;

    let report_path = &processor.checkpoint().paths().report;
    report::write_report(&summary, report_path)?;
    info!("Run report written to {}", report_path.display());

    Ok(())
}
