use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use url::Url;

use vhdlift_storage::{DiskStream, RangeSet};
use vhdlift_upload::{
    detect_empty_ranges, locate_uploadable_ranges, reconcile, upload, AzurePageStore, PageStore,
    PlanConfig, Reconciliation, UploadContext, UploadError, UploadMetadata, UploadPlan,
    UploadProgress, DEFAULT_MAX_ATTEMPTS,
};

const DEFAULT_CONTAINER: &str = "vhds";
const BLOB_SUFFIX: &str = ".vhd";
/// The destination store only accepts page blobs sized to whole megabytes.
const BLOB_SIZE_UNIT: u64 = 1024 * 1024;
const PARALLELISM_PER_CPU: usize = 8;
const PROGRESS_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Parser)]
#[command(name = "vhdlift", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a local VHD to a remote page-blob store, sending only pages
    /// that carry data and resuming interrupted uploads.
    Upload(UploadArgs),
}

#[derive(Debug, Parser)]
struct UploadArgs {
    /// Path to the source VHD (Fixed, Dynamic, or Differencing).
    #[arg(long)]
    image: PathBuf,

    /// Storage account name.
    #[arg(long, required_unless_present = "endpoint")]
    account: Option<String>,

    /// Custom blob endpoint URL (emulators, sovereign clouds). Overrides
    /// --account.
    #[arg(long)]
    endpoint: Option<Url>,

    /// Pre-acquired SAS token authorizing container and blob operations.
    #[arg(long)]
    sas: Option<String>,

    /// Destination container.
    #[arg(long, default_value = DEFAULT_CONTAINER)]
    container: String,

    /// Destination blob name (".vhd" is appended when missing).
    #[arg(long)]
    blob: String,

    /// Number of parallel upload workers.
    /// [default: 8 x available hardware concurrency]
    #[arg(long)]
    parallelism: Option<usize>,

    /// Replace the destination blob if it already exists.
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Suppress progress output.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let cli = Cli::parse();
    match cli.command {
        Commands::Upload(args) => runtime.block_on(run_upload(args)),
    }
}

async fn run_upload(args: UploadArgs) -> Result<()> {
    let blob_name = ensure_blob_suffix(&args.blob);
    let parallelism = args.parallelism.unwrap_or_else(default_parallelism);
    if parallelism == 0 {
        bail!("--parallelism must be > 0");
    }

    // Local validation fails before any remote call is made.
    let stream = DiskStream::open_path(&args.image)
        .with_context(|| format!("open source image {}", args.image.display()))?;
    let size = stream.size();
    if size % BLOB_SIZE_UNIT != 0 {
        return Err(UploadError::SizeConstraint {
            size,
            unit: BLOB_SIZE_UNIT,
        }
        .into());
    }

    if !args.quiet {
        eprintln!("Computing MD5 of {}...", args.image.display());
    }
    let local_metadata =
        UploadMetadata::from_local_file(&args.image, size).context("compute local metadata")?;

    let store = build_store(&args, &blob_name)?;
    tracing::info!(blob = %store.redacted_blob_url(), "destination resolved");
    let store: Arc<dyn PageStore> = Arc::new(store);

    store.create_container().await.context("create container")?;

    let (skip, resume) = match reconcile(store.as_ref(), &local_metadata, args.overwrite).await? {
        Reconciliation::Fresh => {
            let metadata = local_metadata.to_blob_metadata()?;
            store
                .create_page_blob(size, &metadata)
                .await
                .context("create page blob")?;
            (RangeSet::new(), false)
        }
        Reconciliation::Resume { skip } => {
            if !args.quiet {
                eprintln!(
                    "Blob '{blob_name}' already exists, resuming: {} bytes already uploaded",
                    skip.total_len()
                );
            }
            (skip, true)
        }
    };

    let allocated = stream.allocated_ranges();
    let planned = locate_uploadable_ranges(&allocated, &skip, size, PlanConfig::default());

    if !args.quiet {
        eprintln!("Scanning {} candidate range(s) for empty pages...", planned.len());
    }
    let (kept, dropped_zero_bytes) = detect_empty_ranges(&stream, planned)?;
    let plan = UploadPlan::new(size, kept);

    if !args.quiet {
        eprintln!(
            "Uploading {} byte(s) in {} range(s) ({} already present, {} skipped as zero)",
            plan.uploadable_bytes,
            plan.ranges.len(),
            skip.total_len(),
            dropped_zero_bytes
        );
    }

    let progress = Arc::new(UploadProgress::default());
    let bar = make_progress_bar(plan.uploadable_bytes, plan.ranges.len() as u64, args.quiet)?;

    let ctx = UploadContext {
        stream: Arc::new(stream),
        plan,
        parallelism,
        resume,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    };
    let total_ranges = ctx.plan.ranges.len() as u64;

    let upload_task = tokio::spawn(upload(ctx, store.clone(), progress.clone()));
    while !upload_task.is_finished() {
        tokio::time::sleep(PROGRESS_TICK).await;
        bar.set_position(progress.bytes_uploaded());
        bar.set_message(format!(
            "{}/{} ranges",
            progress.ranges_completed(),
            total_ranges
        ));
    }
    upload_task
        .await
        .context("upload task panicked")?
        .context("upload")?;
    bar.set_position(progress.bytes_uploaded());
    bar.finish_with_message(format!("{total_ranges}/{total_ranges} ranges"));

    let md5 = local_metadata.md5_bytes()?;
    store
        .set_content_md5(&md5)
        .await
        .context("set blob content hash")?;

    if !args.quiet {
        eprintln!("\nUpload completed");
    }
    Ok(())
}

fn build_store(args: &UploadArgs, blob_name: &str) -> Result<AzurePageStore> {
    let store = match (&args.endpoint, &args.account) {
        (Some(endpoint), _) => AzurePageStore::new(
            endpoint.clone(),
            &args.container,
            blob_name,
            args.sas.as_deref(),
        ),
        (None, Some(account)) => {
            AzurePageStore::for_account(account, &args.container, blob_name, args.sas.as_deref())
        }
        (None, None) => bail!("either --account or --endpoint is required"),
    };
    store.context("configure page store")
}

fn ensure_blob_suffix(blob: &str) -> String {
    if blob.to_ascii_lowercase().ends_with(BLOB_SUFFIX) {
        blob.to_string()
    } else {
        format!("{blob}{BLOB_SUFFIX}")
    }
}

fn default_parallelism() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    PARALLELISM_PER_CPU * cpus
}

fn make_progress_bar(total_bytes: u64, total_ranges: u64, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg} ({eta})",
        )?
        .progress_chars("##-"),
    );
    bar.set_message(format!("0/{total_ranges} ranges"));
    Ok(bar)
}
