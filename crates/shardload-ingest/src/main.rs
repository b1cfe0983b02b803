//! Shardload - archive extraction and resumable bulk loading

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use shardload_common::logging::{init_logging, LogConfig};
use shardload_ingest::config::{parse_byte_size, parse_field_list, IngestConfig};
use shardload_ingest::extract::{ArchiveReport, ExtractPipeline};
use shardload_ingest::load::{
    verify_shard, BulkLoader, CheckpointStore, MemoryDocumentStore, PgDocumentStore, ShardReport,
};
use shardload_ingest::skip_log::SkipLog;
use shardload_ingest::summary;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "shardload")]
#[command(author, version, about = "Extract record archives into CSV shards and load them into a document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decompress and parse archives into CSV shards
    Extract {
        /// Directory holding .zst / .gz / .ndjson archives
        input_dir: PathBuf,

        /// Directory receiving shards and manifests
        output_dir: PathBuf,

        #[command(flatten)]
        opts: ExtractArgs,
    },

    /// Load CSV shards into the document store
    Load {
        /// Directory holding CSV shards
        shard_dir: PathBuf,

        #[command(flatten)]
        opts: LoadArgs,
    },

    /// Extract, then load the resulting shards
    Run {
        input_dir: PathBuf,
        output_dir: PathBuf,
    },

    /// Report rows whose column count differs from the header
    Verify {
        csv_file: PathBuf,

        /// Expected column count (defaults to the header width)
        #[arg(long)]
        expected: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Parse worker threads per archive
    #[arg(long)]
    workers: Option<usize>,

    /// Records per worker flush
    #[arg(long)]
    batch_size: Option<usize>,

    /// Shard rotation threshold, e.g. 512MiB
    #[arg(long)]
    shard_size: Option<String>,

    /// Comma-separated fixed output columns
    #[arg(long)]
    fields: Option<String>,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Load every shard into this collection instead of routing by file name
    #[arg(long)]
    collection: Option<String>,

    /// Rows per bulk insert
    #[arg(long)]
    batch_size: Option<usize>,

    /// Checkpoint file (defaults to <shard_dir>/checkpoint.json)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Load into an in-memory store with a throwaway checkpoint
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("shardload")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    if cli.no_progress {
        config.show_progress = false;
    }

    match cli.command {
        Command::Extract { input_dir, output_dir, opts } => {
            apply_extract_args(&mut config, opts)?;
            config.validate()?;
            let reports = extract(&config, input_dir, output_dir).await?;
            finish_extract(&reports)
        },
        Command::Load { shard_dir, opts } => {
            if let Some(batch_size) = opts.batch_size {
                config.load.batch_size = batch_size;
            }
            if let Some(path) = opts.checkpoint {
                config.load.checkpoint_file = Some(path);
            }
            config.validate()?;
            let reports = load(&config, &shard_dir, opts.collection, opts.dry_run).await?;
            finish_load(&reports)
        },
        Command::Run { input_dir, output_dir } => {
            config.validate()?;
            let archives = extract(&config, input_dir, output_dir.clone()).await?;
            print!("{}", summary::extract_table(&archives));
            let shards = load(&config, &output_dir, None, false).await?;
            print!("{}", summary::load_table(&shards));

            let failed = archives.iter().filter(|r| r.is_failed()).count()
                + shards.iter().filter(|r| r.is_failed()).count();
            if failed > 0 {
                bail!("{} source(s) failed", failed);
            }
            info!("Run complete");
            Ok(())
        },
        Command::Verify { csv_file, expected } => {
            let report = verify_shard(&csv_file, expected)?;
            print!("{}", summary::verify_table(&csv_file, &report));
            if report.mismatched > 0 {
                bail!("{} row(s) with unexpected column count", report.mismatched);
            }
            Ok(())
        },
    }
}

fn apply_extract_args(config: &mut IngestConfig, opts: ExtractArgs) -> Result<()> {
    if let Some(workers) = opts.workers {
        config.extract.workers = workers;
    }
    if let Some(batch_size) = opts.batch_size {
        config.extract.batch_size = batch_size;
    }
    if let Some(size) = opts.shard_size {
        config.extract.shard_max_bytes = parse_byte_size(&size).context("--shard-size")?;
    }
    if let Some(fields) = opts.fields {
        config.extract.fields = parse_field_list(&fields);
    }
    Ok(())
}

async fn extract(
    config: &IngestConfig,
    input_dir: PathBuf,
    output_dir: PathBuf,
) -> Result<Vec<ArchiveReport>> {
    let skip_log = SkipLog::new(config.load.skip_log_path(&output_dir));
    let pipeline =
        ExtractPipeline::new(config.extract.clone(), output_dir, skip_log, config.show_progress);

    tokio::task::spawn_blocking(move || pipeline.run(&input_dir))
        .await
        .context("Extraction task panicked")?
}

async fn load(
    config: &IngestConfig,
    shard_dir: &Path,
    collection: Option<String>,
    dry_run: bool,
) -> Result<Vec<ShardReport>> {
    if dry_run {
        info!("Dry run: loading into memory, checkpoint untouched");
        let mut loader = BulkLoader::new(
            MemoryDocumentStore::new(),
            config.load.clone(),
            CheckpointStore::ephemeral(),
            SkipLog::disabled(),
        )
        .with_collection(collection)?
        .with_progress(config.show_progress);
        return loader.run(shard_dir).await;
    }

    let checkpoint_path = config.load.checkpoint_path(shard_dir);
    let checkpoint = CheckpointStore::load(&checkpoint_path)
        .with_context(|| format!("Failed to load checkpoint {}", checkpoint_path.display()))?;
    let store = PgDocumentStore::connect(&config.database).await?;

    let mut loader = BulkLoader::new(
        store,
        config.load.clone(),
        checkpoint,
        SkipLog::new(config.load.skip_log_path(shard_dir)),
    )
    .with_collection(collection)?
    .with_progress(config.show_progress);
    loader.run(shard_dir).await
}

fn finish_extract(reports: &[ArchiveReport]) -> Result<()> {
    print!("{}", summary::extract_table(reports));
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        bail!("{} archive(s) failed", failed);
    }
    info!("Extraction complete");
    Ok(())
}

fn finish_load(reports: &[ShardReport]) -> Result<()> {
    print!("{}", summary::load_table(reports));
    let failed = reports.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        bail!("{} shard(s) failed", failed);
    }
    info!("Load complete");
    Ok(())
}
