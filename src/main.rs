//! Streamput - stream stdin (or a literal payload) into an S3 object
//!
//! Reads the source in fixed-size parts and uploads them concurrently
//! through one multipart transaction.

use anyhow::Context;
use bytes::Bytes;
use clap::{CommandFactory, Parser};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use streamput::backend::credentials::Credentials;
use streamput::backend::memory::MemoryBackend;
use streamput::backend::s3::S3Connector;
use streamput::backend::{Connector, ProgressFn};
use streamput::upload::chunker;
use streamput::{logging, metrics, Config, Uploader};
use tracing::info;

/// Streamput - concurrent multipart upload of a byte stream to S3
#[derive(Parser, Debug)]
#[command(name = "streamput")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target bucket
    #[arg(short, long)]
    bucket: String,

    /// Target object key
    #[arg(short, long)]
    key: String,

    /// Access key id (falls back to the config file, then AWS_ACCESS_KEY_ID)
    #[arg(short = 'K', long)]
    aws_key: Option<String>,

    /// Secret access key (falls back to the config file, then AWS_SECRET_ACCESS_KEY)
    #[arg(short = 's', long)]
    aws_secret: Option<String>,

    /// Upload this literal payload instead of reading stdin
    #[arg(short, long)]
    data: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of concurrent part uploads
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Part size in bytes
    #[arg(long)]
    part_size: Option<usize>,

    /// S3-compatible endpoint (host or URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// Region
    #[arg(long)]
    region: Option<String>,

    /// Reach the endpoint over plain HTTP
    #[arg(long)]
    insecure: bool,

    /// Fail instead of overwriting an existing object
    #[arg(long)]
    no_replace: bool,

    /// Upload into an in-memory store instead of S3
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print upload metrics to stderr when done
    #[arg(long)]
    print_metrics: bool,
}

impl Args {
    /// Load the config file (or defaults) and apply command-line overrides
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?,
            None => Config::default(),
        };

        if let Some(parallelism) = self.parallelism {
            config.upload.parallelism = parallelism;
        }
        if let Some(part_size) = self.part_size {
            config.upload.part_size = part_size;
        }
        if let Some(endpoint) = &self.endpoint {
            config.s3.endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            config.s3.region = region.clone();
        }
        if self.insecure {
            config.upload.secure = false;
        }
        config.upload.replace = !self.no_replace;

        config.validate()?;
        if !self.dry_run {
            config.upload.check_store_limits()?;
        }
        Ok(config)
    }

    fn source(&self) -> BoxStream<'static, io::Result<Bytes>> {
        match &self.data {
            Some(data) => chunker::from_bytes(Bytes::from(data.clone())).boxed(),
            None => chunker::from_reader(tokio::io::stdin(), chunker::DEFAULT_READ_SIZE).boxed(),
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("Interrupted, aborting upload"),
        Err(err) => {
            tracing::warn!(error = %err, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args_os().len() < 2 {
        Args::command().print_help()?;
        return Ok(());
    }
    let args = Args::parse();

    logging::init_subscriber(&args.log_level, args.json_logs)?;
    info!("Starting Streamput v{}", streamput::VERSION);

    let config = args.config()?;
    let credentials = Credentials::resolve(
        args.aws_key.clone(),
        args.aws_secret.clone(),
        &config.s3,
    )?;

    let connector: Arc<dyn Connector> = if args.dry_run {
        info!("Dry run, uploading into memory");
        Arc::new(MemoryBackend::new().with_container(&args.bucket))
    } else {
        Arc::new(S3Connector::new(&config.s3))
    };

    let progress: ProgressFn = Arc::new(|part, sent, total| {
        println!("{} {} {}", part, sent, total);
    });
    let uploader = Uploader::new(connector, config.upload.clone()).with_progress(progress);

    let result = uploader
        .upload_until(
            &credentials,
            &args.bucket,
            &args.key,
            args.source(),
            interrupted(),
        )
        .await;

    if args.print_metrics {
        match metrics::gather_text() {
            Ok(text) => eprint!("{}", text),
            Err(err) => tracing::warn!(error = %err, "Failed to render metrics"),
        }
    }

    let summary = result
        .with_context(|| format!("Upload to {}/{} failed", args.bucket, args.key))?;
    info!(
        parts = summary.parts,
        bytes = summary.bytes,
        etag = %summary.etag,
        "Upload complete"
    );
    Ok(())
}
